//! Prompt and image-option validation for generation requests.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Prompts shorter than this (after trimming) are rejected.
pub const MIN_PROMPT_CHARS: usize = 3;

/// Default cap on reference images; more are sent but logged.
pub const DEFAULT_MAX_REFERENCE_IMAGES: usize = 14;

/// Aspect ratios accepted by the image endpoint.
pub const VALID_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];

/// Output sizes accepted by higher-tier models.
pub const VALID_RESOLUTIONS: &[&str] = &["1K", "2K", "4K"];

/// Model-name marker for the higher-tier image models.
const HIGH_TIER_MARKER: &str = "-pro-";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a prompt: at least [`MIN_PROMPT_CHARS`] non-whitespace-trimmed
/// characters.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    let len = prompt.trim().chars().count();
    if len < MIN_PROMPT_CHARS {
        return Err(CoreError::Validation(format!(
            "Prompt must be at least {MIN_PROMPT_CHARS} characters (got {len})"
        )));
    }
    Ok(())
}

/// Validate that `ratio` is one of [`VALID_ASPECT_RATIOS`].
pub fn validate_aspect_ratio(ratio: &str) -> Result<(), CoreError> {
    if VALID_ASPECT_RATIOS.contains(&ratio) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid aspect ratio '{ratio}'. Must be one of: {}",
            VALID_ASPECT_RATIOS.join(", ")
        )))
    }
}

/// Validate that `resolution` is one of [`VALID_RESOLUTIONS`].
pub fn validate_resolution(resolution: &str) -> Result<(), CoreError> {
    if VALID_RESOLUTIONS.contains(&resolution) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid resolution '{resolution}'. Must be one of: {}",
            VALID_RESOLUTIONS.join(", ")
        )))
    }
}

/// Whether `model` honours an explicit output size.
pub fn supports_resolution(model: &str) -> bool {
    model.contains(HIGH_TIER_MARKER)
}

/// Number of reference images beyond `max`, if any.
pub fn excess_reference_images(count: usize, max: usize) -> Option<usize> {
    count.checked_sub(max).filter(|excess| *excess > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_of_three_chars_is_valid() {
        assert!(validate_prompt("cat").is_ok());
    }

    #[test]
    fn short_prompt_is_invalid() {
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt("ab").is_err());
        assert!(validate_prompt("  ab   ").is_err());
    }

    #[test]
    fn prompt_length_counts_chars_not_bytes() {
        assert!(validate_prompt("日本語").is_ok());
    }

    #[test]
    fn aspect_ratio_validation() {
        assert!(validate_aspect_ratio("16:9").is_ok());
        assert!(validate_aspect_ratio("1:1").is_ok());
        assert!(validate_aspect_ratio("7:5").is_err());
        assert!(validate_aspect_ratio("").is_err());
    }

    #[test]
    fn resolution_validation() {
        assert!(validate_resolution("2K").is_ok());
        assert!(validate_resolution("8K").is_err());
        assert!(validate_resolution("2k").is_err());
    }

    #[test]
    fn only_pro_models_support_resolution() {
        assert!(supports_resolution("gemini-3-pro-image-preview"));
        assert!(!supports_resolution("gemini-2.5-flash-image"));
    }

    #[test]
    fn excess_reference_images_counts_overflow() {
        assert_eq!(excess_reference_images(3, 14), None);
        assert_eq!(excess_reference_images(14, 14), None);
        assert_eq!(excess_reference_images(16, 14), Some(2));
    }
}
