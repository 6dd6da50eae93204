//! TTS platform identifiers and per-platform request rules.

use serde_json::Value;

use crate::capability::SynthesisRequest;
use crate::fingerprint::Options;

pub const AMAZON_POLLY: &str = "amazon_polly";
pub const BAIDU: &str = "baidu";
pub const GOOGLE_CLOUD: &str = "google_cloud";
pub const GOOGLE_TRANSLATE: &str = "google_translate";
pub const IBM_WATSON_TTS: &str = "watson_tts";
pub const MARYTTS: &str = "marytts";
pub const MICROSOFT_EDGE_TTS: &str = "edge_tts";
pub const MICROSOFT_TTS: &str = "microsoft";
pub const NABU_CASA_CLOUD_TTS: &str = "tts.home_assistant_cloud";
pub const NABU_CASA_CLOUD_TTS_OLD: &str = "cloud";
pub const OPENAI_TTS: &str = "openai_tts";
pub const PICOTTS: &str = "picotts";
pub const PIPER: &str = "piper";
pub const VOICE_RSS: &str = "voicerss";
pub const YANDEX_TTS: &str = "yandextts";

/// Human readable name used in diagnostics.
pub fn display_name(platform: &str) -> &str {
    match platform {
        AMAZON_POLLY => "Amazon Polly",
        BAIDU => "Baidu",
        GOOGLE_CLOUD => "Google Cloud",
        GOOGLE_TRANSLATE => "Google Translate",
        IBM_WATSON_TTS => "Watson TTS",
        MARYTTS => "MaryTTS",
        MICROSOFT_TTS => "Microsoft TTS",
        MICROSOFT_EDGE_TTS => "Microsoft Edge TTS",
        NABU_CASA_CLOUD_TTS | NABU_CASA_CLOUD_TTS_OLD => "Nabu Casa Cloud TTS",
        OPENAI_TTS => "OpenAI TTS",
        PICOTTS => "PicoTTS",
        PIPER => "Piper",
        VOICE_RSS => "VoiceRSS",
        YANDEX_TTS => "Yandex TTS",
        other => other,
    }
}

/// Map retired ids onto their replacement.
pub fn canonical_id(platform: &str) -> &str {
    match platform.trim() {
        NABU_CASA_CLOUD_TTS_OLD => NABU_CASA_CLOUD_TTS,
        other => other,
    }
}

/// Build the request actually sent to the engine.
///
/// Language is only forwarded to platforms that take one (Watson receives
/// it as its voice). The engine's own cache is never used for Google
/// Translate or cloud TTS, and `tld` / `gender` are dropped for platforms
/// that would reject them. `None` when there is nothing to synthesize.
pub fn synthesis_request(
    platform: &str,
    text: &str,
    language: Option<&str>,
    cache: bool,
    options: &Options,
) -> Option<SynthesisRequest> {
    let text = text.trim();
    let engine = canonical_id(platform);
    if text.is_empty() || engine.is_empty() {
        return None;
    }

    let mut options = options.clone();
    let language = language.map(str::trim).filter(|l| !l.is_empty());
    let language = match language {
        Some(language)
            if matches!(
                engine,
                GOOGLE_TRANSLATE | NABU_CASA_CLOUD_TTS | IBM_WATSON_TTS | MICROSOFT_EDGE_TTS
            ) =>
        {
            if engine == IBM_WATSON_TTS {
                options.insert("voice".into(), Value::String(language.to_string()));
            }
            Some(language.to_string())
        }
        _ => None,
    };

    if engine != GOOGLE_TRANSLATE {
        options.remove("tld");
    }
    if engine != NABU_CASA_CLOUD_TTS {
        options.remove("gender");
    }

    Some(SynthesisRequest {
        text: text.to_string(),
        engine: engine.to_string(),
        language,
        cache: cache && !matches!(engine, GOOGLE_TRANSLATE | NABU_CASA_CLOUD_TTS),
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> Options {
        let mut options = Options::new();
        options.insert("tld".into(), json!("co.uk"));
        options.insert("gender".into(), json!("female"));
        options.insert("speaker".into(), json!("p1"));
        options
    }

    #[test]
    fn test_old_cloud_id_is_mapped() {
        let request = synthesis_request("cloud", "hi", Some("en-GB"), true, &options()).unwrap();
        assert_eq!(request.engine, NABU_CASA_CLOUD_TTS);
        assert_eq!(request.language.as_deref(), Some("en-GB"));
        assert!(!request.cache);
        assert_eq!(request.options.get("gender"), Some(&json!("female")));
        assert!(!request.options.contains_key("tld"));
    }

    #[test]
    fn test_language_dropped_for_platforms_without_one() {
        let request = synthesis_request(PIPER, "hi", Some("en"), true, &options()).unwrap();
        assert_eq!(request.language, None);
        assert!(request.cache);
        assert!(!request.options.contains_key("tld"));
        assert!(!request.options.contains_key("gender"));
        assert_eq!(request.options.get("speaker"), Some(&json!("p1")));
    }

    #[test]
    fn test_watson_gets_language_as_voice() {
        let request =
            synthesis_request(IBM_WATSON_TTS, "hi", Some("en-US_AllisonV3Voice"), true, &Options::new())
                .unwrap();
        assert_eq!(request.options.get("voice"), Some(&json!("en-US_AllisonV3Voice")));
    }

    #[test]
    fn test_google_translate_keeps_tld_but_not_cache() {
        let request = synthesis_request(GOOGLE_TRANSLATE, "hi", None, true, &options()).unwrap();
        assert_eq!(request.options.get("tld"), Some(&json!("co.uk")));
        assert!(!request.cache);
    }

    #[test]
    fn test_nothing_to_synthesize() {
        assert!(synthesis_request(PIPER, "  ", None, true, &Options::new()).is_none());
        assert!(synthesis_request("", "hi", None, true, &Options::new()).is_none());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(display_name(AMAZON_POLLY), "Amazon Polly");
        assert_eq!(display_name("cloud"), "Nabu Casa Cloud TTS");
        assert_eq!(display_name("my_engine"), "my_engine");
    }
}
