use chime_core::SayRequest;

use crate::error::ApiError;

/// Maximum message length for say requests
const MAX_MESSAGE_LENGTH: usize = 5000;
/// Accepted `tts_playback_speed` range, in percent
const MIN_SPEED: f64 = 1.0;
const MAX_SPEED: f64 = 500.0;

/// Validate a say / say_url request before it is queued.
pub fn validate_say_request(request: &SayRequest) -> Result<(), ApiError> {
    let has_audio = [&request.message, &request.chime_path, &request.end_chime_path]
        .iter()
        .any(|s| !s.trim().is_empty());
    if !has_audio {
        return Err(ApiError::InvalidInput(
            "A message, chime_path or end_chime_path is required".to_string(),
        ));
    }
    if request.message.len() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        )));
    }

    let speed = request.tts_playback_speed;
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(ApiError::InvalidInput(format!(
            "tts_playback_speed must be between {} and {} (got {})",
            MIN_SPEED, MAX_SPEED, speed
        )));
    }

    // Negative leaves the volume untouched
    let volume = request.volume_level;
    if volume.is_nan() || volume > 1.0 {
        return Err(ApiError::InvalidInput(format!(
            "volume_level must be between 0 and 1 (got {})",
            volume
        )));
    }

    if !request.offset.is_finite() || !request.final_delay.is_finite() || request.final_delay < 0.0 {
        return Err(ApiError::InvalidInput(
            "offset and final_delay must be finite, final_delay non-negative".to_string(),
        ));
    }

    for target in request.targets() {
        if !is_valid_entity_id(&target) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid entity_id: {}. Expected format: domain.object_id",
                target
            )));
        }
    }

    Ok(())
}

/// `domain.object_id`, both parts made of lowercase letters, digits and `_`
fn is_valid_entity_id(id: &str) -> bool {
    let valid_part =
        |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    match id.split_once('.') {
        Some((domain, object_id)) => valid_part(domain) && valid_part(object_id),
        None => false,
    }
}
