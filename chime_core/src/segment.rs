//! Message grammar.
//!
//! A message is free text interleaved with three tags:
//!
//! ```text
//! <chime path="bell.mp3" offset=-200>
//! <delay length=1500>
//! <tts platform=piper language=en speed=125>Dinner is ready</tts>
//! <tts message="Also as an attribute"/>
//! ```
//!
//! Text outside any tag is spoken with the request defaults. Attribute
//! values may be double-quoted, single-quoted or bare. Anything that looks
//! like a tag but is not one of the three is kept as text.

use serde_json::Value;
use tracing::warn;

use crate::fingerprint::Options;

const TAG_CHIME: &str = "chime";
const TAG_DELAY: &str = "delay";
const TAG_TTS: &str = "tts";

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Chime(ChimeSegment),
    Delay { length_ms: f64 },
    Tts(TtsSegment),
}

/// Unset fields fall back to the request defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChimeSegment {
    pub path: String,
    pub offset: Option<f64>,
    pub cache: Option<bool>,
    pub audio_conversion: Option<String>,
}

/// Unset fields fall back to the request defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TtsSegment {
    pub message: String,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub options: Options,
    /// Percent, 100 = unchanged
    pub speed: Option<f64>,
    pub offset: Option<f64>,
    pub cache: Option<bool>,
    pub audio_conversion: Option<String>,
}

impl TtsSegment {
    /// Plain text spoken with the request defaults.
    pub fn plain<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Open {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close(String),
}

fn is_known_tag(name: &str) -> bool {
    matches!(name, TAG_CHIME | TAG_DELAY | TAG_TTS)
}

fn tokenize(message: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = message;

    while let Some(idx) = rest.find('<') {
        text.push_str(&rest[..idx]);
        let candidate = &rest[idx..];
        match read_tag(candidate) {
            Some((token, consumed)) => {
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                tokens.push(token);
                rest = &candidate[consumed..];
            }
            None => {
                text.push('<');
                rest = &candidate[1..];
            }
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    tokens
}

/// Read one known tag at the start of `input` (which begins with `<`).
/// Returns the token and the number of bytes consumed.
fn read_tag(input: &str) -> Option<(Token, usize)> {
    let mut quote: Option<char> = None;
    let mut end = None;
    for (i, c) in input.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => {
                end = Some(i);
                break;
            }
            (None, '<') => return None,
            _ => {}
        }
    }
    let end = end?;
    let inner = input[1..end].trim();

    if let Some(name) = inner.strip_prefix('/') {
        let name = name.trim().to_ascii_lowercase();
        return is_known_tag(&name).then(|| (Token::Close(name), end + 1));
    }

    let (inner, self_closing) = match inner.strip_suffix('/') {
        Some(stripped) => (stripped.trim_end(), true),
        None => (inner, false),
    };
    let name_end = inner
        .find(|c: char| c.is_whitespace())
        .unwrap_or(inner.len());
    let name = inner[..name_end].to_ascii_lowercase();
    if !is_known_tag(&name) {
        return None;
    }

    let attrs = read_attributes(&inner[name_end..]);
    Some((
        Token::Open {
            name,
            attrs,
            self_closing,
        },
        end + 1,
    ))
}

fn read_attributes(input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            match chars.peek().copied() {
                Some(q @ ('"' | '\'')) => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == q {
                            break;
                        }
                        value.push(c);
                    }
                }
                _ => {
                    while let Some(&c) = chars.peek() {
                        if c.is_whitespace() {
                            break;
                        }
                        value.push(c);
                        chars.next();
                    }
                }
            }
        }

        if !key.is_empty() {
            attrs.push((key.to_ascii_lowercase(), value));
        }
    }
    attrs
}

/// Split `message` into ordered segments. Malformed tags are skipped with
/// a warning; parsing never fails.
pub fn parse_message(message: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut open_tts: Option<(TtsSegment, String)> = None;

    for token in tokenize(message) {
        if let Some((segment, body)) = open_tts.as_mut() {
            match token {
                Token::Text(text) => {
                    body.push_str(&text);
                    continue;
                }
                Token::Close(ref name) if name == TAG_TTS => {
                    let (segment, body) = (std::mem::take(segment), std::mem::take(body));
                    open_tts = None;
                    push_tts(&mut segments, segment, &body);
                    continue;
                }
                _ => {
                    // Any other tag ends the open block
                    let (segment, body) = (std::mem::take(segment), std::mem::take(body));
                    open_tts = None;
                    push_tts(&mut segments, segment, &body);
                }
            }
        }

        match token {
            Token::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    segments.push(Segment::Tts(TtsSegment::plain(text)));
                }
            }
            Token::Open { name, attrs, self_closing } => match name.as_str() {
                TAG_CHIME => match chime_segment(&attrs) {
                    Some(chime) => segments.push(Segment::Chime(chime)),
                    None => warn!("Skipping <chime> tag without a path"),
                },
                TAG_DELAY => match attr(&attrs, "length").and_then(parse_number) {
                    Some(length_ms) => segments.push(Segment::Delay { length_ms }),
                    None => warn!("Skipping <delay> tag without a valid length"),
                },
                _ => {
                    let segment = tts_segment(&attrs);
                    if self_closing {
                        push_tts(&mut segments, segment, "");
                    } else {
                        open_tts = Some((segment, String::new()));
                    }
                }
            },
            Token::Close(_) => {}
        }
    }

    if let Some((segment, body)) = open_tts {
        push_tts(&mut segments, segment, &body);
    }
    segments
}

fn push_tts(segments: &mut Vec<Segment>, mut segment: TtsSegment, body: &str) {
    let body = body.trim();
    if !body.is_empty() {
        segment.message = body.to_string();
    }
    segment.message = segment.message.trim().to_string();
    if segment.message.is_empty() {
        warn!("Skipping <tts> tag without any text");
        return;
    }
    segments.push(Segment::Tts(segment));
}

fn chime_segment(attrs: &[(String, String)]) -> Option<ChimeSegment> {
    let path = attr(attrs, "path").map(str::trim).filter(|p| !p.is_empty())?;
    Some(ChimeSegment {
        path: path.to_string(),
        offset: offset_attr(attrs),
        cache: attr(attrs, "cache").and_then(parse_flag),
        audio_conversion: non_empty(attr(attrs, "audio_conversion")),
    })
}

fn tts_segment(attrs: &[(String, String)]) -> TtsSegment {
    let mut segment = TtsSegment {
        message: attr(attrs, "message").unwrap_or_default().to_string(),
        platform: non_empty(attr(attrs, "tts_platform").or_else(|| attr(attrs, "platform"))),
        language: non_empty(attr(attrs, "language")),
        options: Options::new(),
        speed: attr(attrs, "tts_playback_speed")
            .or_else(|| attr(attrs, "speed"))
            .and_then(parse_number),
        offset: offset_attr(attrs),
        cache: attr(attrs, "cache").and_then(parse_flag),
        audio_conversion: non_empty(attr(attrs, "audio_conversion")),
    };

    const HANDLED: [&str; 10] = [
        "message",
        "tts_platform",
        "platform",
        "language",
        "tts_playback_speed",
        "speed",
        "offset",
        "delay",
        "cache",
        "audio_conversion",
    ];
    for (key, value) in attrs {
        if HANDLED.contains(&key.as_str()) || value.trim().is_empty() {
            continue;
        }
        segment.options.insert(key.clone(), option_value(value));
    }
    segment
}

/// `offset` wins over the older `delay` spelling.
fn offset_attr(attrs: &[(String, String)]) -> Option<f64> {
    attr(attrs, "offset")
        .and_then(parse_number)
        .or_else(|| attr(attrs, "delay").and_then(parse_number))
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A bare `cache` attribute means true.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn option_value(value: &str) -> Value {
    let value = value.trim();
    match serde_json::from_str::<Value>(value) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(value.to_string()),
    }
}
