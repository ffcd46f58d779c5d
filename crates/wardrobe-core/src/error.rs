use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardrobeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Preset name '{0}' is reserved")]
    ReservedPresetName(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Unknown slot: {0}")]
    UnknownSlot(String),

    #[error("Outfit system not ready: {0}")]
    NotReady(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl WardrobeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        WardrobeError::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let e = WardrobeError::invalid("characterId is required");
        assert_eq!(e.to_string(), "Invalid argument: characterId is required");

        let e = WardrobeError::ReservedPresetName("default".into());
        assert_eq!(e.to_string(), "Preset name 'default' is reserved");

        let e = WardrobeError::PresetNotFound("casual".into());
        assert_eq!(e.to_string(), "Preset not found: casual");

        let e = WardrobeError::Config("bad slot".into());
        assert_eq!(e.to_string(), "Config error: bad slot");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let e: WardrobeError = io_err.into();
        assert!(e.to_string().contains("not found"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{invalid").unwrap_err();
        let e: WardrobeError = json_err.into();
        assert!(e.to_string().contains("JSON error"));
    }
}
