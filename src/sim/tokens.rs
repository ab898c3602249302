use crate::sim::resources::RESOURCE_PREFIX;

pub const BUILDING_PREFIX: &str = "bld.";
pub const ADDON_PREFIX: &str = "add.";
pub const RESEARCH_PREFIX: &str = "rsd.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Building,
    Addon,
    Research,
    Resource,
}

impl TokenKind {
    pub fn prefix(self) -> &'static str {
        match self {
            TokenKind::Building => BUILDING_PREFIX,
            TokenKind::Addon => ADDON_PREFIX,
            TokenKind::Research => RESEARCH_PREFIX,
            TokenKind::Resource => RESOURCE_PREFIX,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        [
            TokenKind::Building,
            TokenKind::Addon,
            TokenKind::Research,
            TokenKind::Resource,
        ]
        .into_iter()
        .find(|kind| token.starts_with(kind.prefix()))
    }
}

/// One parsed prerequisite. `series` keeps its prefix (`bld.sawmill`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Known {
        kind: TokenKind,
        series: String,
        level: u32,
    },
    Unknown(String),
}

impl Requirement {
    pub fn parse(raw: &str) -> Self {
        let token = raw.trim().to_ascii_lowercase();
        let Some(kind) = TokenKind::from_token(&token) else {
            return Requirement::Unknown(raw.trim().to_string());
        };
        let (series, level) = split_level(&token);
        if series.len() <= kind.prefix().len() {
            return Requirement::Unknown(raw.trim().to_string());
        }
        match level {
            LevelSuffix::Missing => Requirement::Known {
                kind,
                series: series.to_string(),
                level: 1,
            },
            LevelSuffix::Level(level) => Requirement::Known {
                kind,
                series: series.to_string(),
                level,
            },
            LevelSuffix::Malformed => Requirement::Unknown(raw.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSuffix {
    Missing,
    Level(u32),
    Malformed,
}

/// Splits `family.l3` into `("family", Level(3))`. A trailing segment that
/// starts with `l` but is not a number is reported as malformed.
pub fn split_level(key: &str) -> (&str, LevelSuffix) {
    let Some((head, tail)) = key.rsplit_once('.') else {
        return (key, LevelSuffix::Missing);
    };
    let Some(digits) = tail.strip_prefix('l').or_else(|| tail.strip_prefix('L')) else {
        return (key, LevelSuffix::Missing);
    };
    if digits.is_empty() {
        // a family literally named `...l`
        return (key, LevelSuffix::Missing);
    }
    match digits.parse::<u32>() {
        Ok(level) => (head, LevelSuffix::Level(level)),
        Err(_) if digits.chars().all(|c| c.is_ascii_alphabetic()) => (key, LevelSuffix::Missing),
        Err(_) => (head, LevelSuffix::Malformed),
    }
}

/// Splits a requirement list on commas, semicolons and whitespace.
pub fn parse_requirements<S: AsRef<str>>(tokens: &[S]) -> Vec<Requirement> {
    tokens
        .iter()
        .flat_map(|chunk| {
            chunk
                .as_ref()
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|token| !token.is_empty())
                .map(Requirement::parse)
                .collect::<Vec<_>>()
        })
        .collect()
}
