//! Backbone presets for the end-to-end classifier

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::graph::ConvGraphConfig;

/// Backbone size preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// Small and fast, meant for quick experiments on CPU
    Compact,
    #[default]
    Standard,
    /// More filters and a larger input
    Wide,
}

impl Architecture {
    /// Graph configuration of the backbone
    pub fn graph_config(&self) -> ConvGraphConfig {
        match self {
            Architecture::Compact => ConvGraphConfig::new()
                .with_base_filters(8)
                .with_depth(3)
                .with_embedding_size(64),
            Architecture::Standard => ConvGraphConfig::new()
                .with_base_filters(16)
                .with_depth(4)
                .with_embedding_size(128),
            Architecture::Wide => ConvGraphConfig::new()
                .with_base_filters(32)
                .with_depth(4)
                .with_embedding_size(256),
        }
    }

    /// Side length images are resized to before entering the backbone
    pub fn input_size(&self) -> u32 {
        match self {
            Architecture::Compact => 64,
            Architecture::Standard => 96,
            Architecture::Wide => 128,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Compact => write!(f, "compact"),
            Architecture::Standard => write!(f, "standard"),
            Architecture::Wide => write!(f, "wide"),
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(Architecture::Compact),
            "standard" => Ok(Architecture::Standard),
            "wide" => Ok(Architecture::Wide),
            other => Err(format!("unknown architecture '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_survives_pooling() {
        for arch in [Architecture::Compact, Architecture::Standard, Architecture::Wide] {
            assert!(arch.input_size() >= arch.graph_config().min_input_size());
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        assert_eq!("Wide".parse::<Architecture>().unwrap(), Architecture::Wide);
        assert_eq!(Architecture::Compact.to_string(), "compact");
        assert!("resnet".parse::<Architecture>().is_err());
    }
}
