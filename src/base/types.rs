use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// Presence status of a kChat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Away,
    Offline,
    Dnd,
}

impl Status {
    /// The wire name kChat uses for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Away => "away",
            Status::Offline => "offline",
            Status::Dnd => "dnd",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Res<Self> {
        match s {
            "online" => Ok(Status::Online),
            "away" => Ok(Status::Away),
            "offline" => Ok(Status::Offline),
            "dnd" => Ok(Status::Dnd),
            other => Err(anyhow::anyhow!("Unknown status type `{other}`.")),
        }
    }
}

/// kChat channel types, as carried in the `type` field of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Open,
    Private,
    Direct,
    Group,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Open => "O",
            ChannelType::Private => "P",
            ChannelType::Direct => "D",
            ChannelType::Group => "G",
        }
    }

    /// Parses the single-letter channel code; unknown codes are treated as open channels.
    pub fn from_code(code: &str) -> Self {
        match code {
            "P" => ChannelType::Private,
            "D" => ChannelType::Direct,
            "G" => ChannelType::Group,
            _ => ChannelType::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_known_values() {
        assert_eq!("dnd".parse::<Status>().unwrap(), Status::Dnd);
        assert_eq!("away".parse::<Status>().unwrap(), Status::Away);
        assert!("busy".parse::<Status>().is_err());
    }

    #[test]
    fn channel_type_codes() {
        assert_eq!(ChannelType::from_code("D"), ChannelType::Direct);
        assert_eq!(ChannelType::from_code("?"), ChannelType::Open);
        assert_eq!(ChannelType::Private.as_str(), "P");
    }
}
