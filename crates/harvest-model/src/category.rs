use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A scrape category: one Stack Overflow tag and the file its records land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    DataScience = 0,
    MachineLearning = 1,
    ArtificialIntelligence = 2,
}

/// Static configuration for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySpec {
    /// Short selector accepted on the command line (e.g., "ds").
    pub selector: &'static str,
    /// Site tag used in listing URLs (e.g., "data-science").
    pub tag: &'static str,
    /// Output file path, relative to the working directory.
    pub output_path: &'static str,
    /// Number of listing pages fetched when no limit is given.
    pub default_pages: u32,
}

/// Indexed by `Category as usize`.
const TABLE: [CategorySpec; 3] = [
    CategorySpec {
        selector: "ds",
        tag: "data-science",
        output_path: "data/data_science.json",
        default_pages: 5,
    },
    CategorySpec {
        selector: "ml",
        tag: "machine-learning",
        output_path: "data/machine_learning.json",
        default_pages: 8,
    },
    CategorySpec {
        selector: "ai",
        tag: "artificial-intelligence",
        output_path: "data/artificial_intelligence.json",
        default_pages: 8,
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CategoryError {
    #[error("unknown category '{0}' (expected one of: ds, ml, ai)")]
    Unknown(String),
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::DataScience,
        Category::MachineLearning,
        Category::ArtificialIntelligence,
    ];

    /// Look up the static configuration for this category.
    pub fn spec(self) -> &'static CategorySpec {
        &TABLE[self as usize]
    }

    pub fn selector(self) -> &'static str {
        self.spec().selector
    }

    pub fn tag(self) -> &'static str {
        self.spec().tag
    }

    pub fn output_path(self) -> &'static str {
        self.spec().output_path
    }

    pub fn default_pages(self) -> u32 {
        self.spec().default_pages
    }

    /// Output paths of every category, in table order.
    pub fn all_output_paths() -> Vec<&'static str> {
        TABLE.iter().map(|spec| spec.output_path).collect()
    }
}

impl FromStr for Category {
    type Err = CategoryError;

    /// Accepts either the short selector ("ds") or the full site tag ("data-science").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.selector() == needle || c.tag() == needle)
            .ok_or_else(|| CategoryError::Unknown(s.to_string()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
