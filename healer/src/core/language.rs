//! Target languages supported by the sandbox and extractor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::classifier::{LineClassifier, PythonLineClassifier, ShellLineClassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    Python,
    Shell,
}

impl Language {
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Shell => "sh",
        }
    }

    pub fn default_interpreter(self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Shell => "sh",
        }
    }

    /// Fence tags that mark a block as written in this language.
    pub fn fence_tags(self) -> &'static [&'static str] {
        match self {
            Language::Python => &["python", "py", "python3"],
            Language::Shell => &["sh", "bash", "shell", "zsh"],
        }
    }

    /// Tag used when this crate fences code into prompts.
    pub fn fence_tag(self) -> &'static str {
        self.fence_tags()[0]
    }

    pub fn classifier(self) -> &'static dyn LineClassifier {
        match self {
            Language::Python => &PythonLineClassifier,
            Language::Shell => &ShellLineClassifier,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::Shell => "POSIX shell",
        }
    }

    /// Guess the language of a file from its extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Language::Python),
            "sh" | "bash" => Some(Language::Shell),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => f.write_str("python"),
            Language::Shell => f.write_str("shell"),
        }
    }
}
