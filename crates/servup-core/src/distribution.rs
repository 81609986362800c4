#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    #[default]
    Payara,
    PayaraMl,
    PayaraWeb,
    PayaraWebMl,
}

/// Whether a distribution ships the message-queue component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionVariant {
    Full,
    Web,
}

impl Distribution {
    pub const ALL: [Distribution; 4] = [
        Self::Payara,
        Self::PayaraMl,
        Self::PayaraWeb,
        Self::PayaraWebMl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Payara => "payara",
            Self::PayaraMl => "payara-ml",
            Self::PayaraWeb => "payara-web",
            Self::PayaraWebMl => "payara-web-ml",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "payara" => Some(Self::Payara),
            "payara-ml" => Some(Self::PayaraMl),
            "payara-web" => Some(Self::PayaraWeb),
            "payara-web-ml" => Some(Self::PayaraWebMl),
            _ => None,
        }
    }

    pub fn variant(self) -> DistributionVariant {
        match self {
            Self::Payara | Self::PayaraMl => DistributionVariant::Full,
            Self::PayaraWeb | Self::PayaraWebMl => DistributionVariant::Web,
        }
    }

    pub fn archive_file_name(self, version: &str) -> String {
        format!("{}-{version}.zip", self.as_str())
    }
}

impl std::fmt::Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
