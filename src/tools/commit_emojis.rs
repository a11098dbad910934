//! Emoji placeholders for commit messages, backed by gitmoji data

use crate::tools::ToolError;
use console::{measure_text_width, style};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const GITMOJIS_FILE: &str = "gitmojis.json";
pub const CATEGORIES_FILE: &str = "categories.json";

pub const DEFAULT_URL_BASE: &str =
    "https://raw.githubusercontent.com/carloscuesta/gitmoji/master/packages/gitmojis/src";
pub const DEFAULT_UPDATE_FILES: [&str; 2] = ["gitmojis.json", "schema.json"];

const EMBEDDED_GITMOJIS: &str = include_str!("../../data/gitmojis.json");
const EMBEDDED_CATEGORIES: &str = include_str!("../../data/categories.json");

const SKIPPED_CATEGORY: &str = "Intentionally Skipped";
const UNCATEGORIZED: &str = "Uncategorized";

/// Conventional commit type -> gitmoji code
const CONVENTIONAL_TYPES: &[(&str, &str)] = &[
    ("feat", ":sparkles:"),
    ("fix", ":bug:"),
    ("docs", ":memo:"),
    ("style", ":art:"),
    ("refactor", ":recycle:"),
    ("perf", ":zap:"),
    ("test", ":white_check_mark:"),
    ("build", ":package:"),
    ("ci", ":construction_worker:"),
    ("chore", ":wrench:"),
    ("revert", ":rewind:"),
];

#[derive(Debug, Deserialize)]
struct GitmojiFile {
    gitmojis: Vec<GitmojiEntry>,
}

#[derive(Debug, Deserialize)]
struct GitmojiEntry {
    emoji: String,
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    category: String,
    items: Vec<CategoryItem>,
}

#[derive(Debug, Deserialize)]
struct CategoryItem {
    code: String,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiInfo {
    /// Code without colons (`tada`)
    pub name: String,
    pub emoji: String,
    /// Code with colons (`:tada:`)
    pub code: String,
    pub description: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub items: Vec<EmojiInfo>,
}

/// All known emojis, grouped by category. Emojis without an explicit
/// category are collected last, under "Uncategorized".
#[derive(Debug, Clone)]
pub struct EmojiCatalog {
    categories: Vec<Category>,
    by_code: HashMap<String, String>,
    by_alias: HashMap<String, String>,
}

impl EmojiCatalog {
    /// Catalog built into the binary
    pub fn embedded() -> Result<Self, ToolError> {
        Self::from_json(EMBEDDED_GITMOJIS, EMBEDDED_CATEGORIES)
    }

    /// Load `gitmojis.json` and `categories.json` from a directory
    pub fn load(dir: &Path) -> Result<Self, ToolError> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|e| ToolError::io(path, e))
        };
        Self::from_json(&read(GITMOJIS_FILE)?, &read(CATEGORIES_FILE)?)
    }

    pub fn from_json(gitmojis: &str, categories: &str) -> Result<Self, ToolError> {
        let gitmojis: GitmojiFile = serde_json::from_str(gitmojis)
            .map_err(|e| ToolError::EmojiData(format!("{}: {}", GITMOJIS_FILE, e)))?;
        let category_entries: Vec<CategoryEntry> = serde_json::from_str(categories)
            .map_err(|e| ToolError::EmojiData(format!("{}: {}", CATEGORIES_FILE, e)))?;

        // Keep gitmoji order for the uncategorized remainder
        let mut remaining: Vec<Option<GitmojiEntry>> = gitmojis.gitmojis.into_iter().map(Some).collect();
        let index: HashMap<String, usize> = remaining
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (e.code.clone(), i)))
            .collect();

        let mut categories = Vec::new();
        for entry in category_entries {
            let mut items = Vec::new();
            for item in entry.items {
                let raw = index
                    .get(&item.code)
                    .and_then(|&i| remaining[i].take())
                    .ok_or_else(|| {
                        ToolError::EmojiData(format!(
                            "'{}' in category '{}' is unknown or listed twice",
                            item.code, entry.category
                        ))
                    })?;
                items.push(emoji_info(raw, item.aliases));
            }
            if items.is_empty() {
                return Err(ToolError::EmojiData(format!(
                    "The category '{}' is empty",
                    entry.category
                )));
            }
            categories.push(Category {
                name: entry.category,
                items,
            });
        }

        let uncategorized: Vec<EmojiInfo> = remaining
            .into_iter()
            .flatten()
            .map(|raw| emoji_info(raw, Vec::new()))
            .collect();
        if !uncategorized.is_empty() {
            categories.push(Category {
                name: UNCATEGORIZED.to_string(),
                items: uncategorized,
            });
        }

        let mut by_code = HashMap::new();
        let mut by_alias = HashMap::new();
        for item in categories.iter().flat_map(|c| &c.items) {
            by_code.insert(item.code.clone(), item.emoji.clone());
            for alias in &item.aliases {
                if by_alias.insert(alias.clone(), item.code.clone()).is_some() {
                    return Err(ToolError::EmojiData(format!(
                        "The alias '{}' is defined more than once",
                        alias
                    )));
                }
            }
        }

        Ok(Self {
            categories,
            by_code,
            by_alias,
        })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn emoji_for_code(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(String::as_str)
    }

    /// Replace placeholders in a commit message.
    ///
    /// `:alias:` becomes `<emoji> [alias]`, `:code:` becomes its emoji and a
    /// leading conventional-commit type gets its emoji prefixed. Anything
    /// unknown is left as written.
    pub fn transform(&self, message: &str) -> Result<String, ToolError> {
        let placeholder = Regex::new(r":(?P<value>[^:\s]+):")?;

        let message = placeholder.replace_all(message, |captures: &Captures| {
            let value = &captures["value"];
            match self.by_alias.get(value) {
                Some(code) => format!("{} [{}]", code, value),
                None => captures[0].to_string(),
            }
        });

        let message = placeholder.replace_all(&message, |captures: &Captures| {
            self.by_code
                .get(&captures[0])
                .cloned()
                .unwrap_or_else(|| captures[0].to_string())
        });

        self.prefix_conventional_type(&message)
    }

    fn prefix_conventional_type(&self, message: &str) -> Result<String, ToolError> {
        let conventional = Regex::new(r"^(?P<type>[a-z]+)(\([^)]*\))?!?:\s")?;

        let emoji = conventional.captures(message).and_then(|captures| {
            CONVENTIONAL_TYPES
                .iter()
                .find(|(kind, _)| *kind == &captures["type"])
                .and_then(|(_, code)| self.emoji_for_code(code))
        });

        Ok(match emoji {
            Some(emoji) => format!("{} {}", emoji, message),
            None => message.to_string(),
        })
    }

    /// Render one table per category
    pub fn display(&self) -> String {
        let mut output = String::new();

        for category in &self.categories {
            let show_aliases = category.name != SKIPPED_CATEGORY;

            output.push_str(&format!("{}\n\n", style(format!("── {} ──", category.name)).bold().white()));

            let mut headers = vec!["Emoji", "Emoji Name", "Description"];
            if show_aliases {
                headers.push("Aliases");
            }
            let rows: Vec<Vec<String>> = category
                .items
                .iter()
                .map(|item| {
                    let mut row = vec![item.emoji.clone(), item.name.clone(), item.description.clone()];
                    if show_aliases {
                        row.push(item.aliases.join(", "));
                    }
                    row
                })
                .collect();

            output.push_str(&render_table(&headers, &rows));

            let mut footer = vec![r#"add ":<name>:" to the commit message (e.g. ":tada:")"#];
            if show_aliases {
                footer.push(r#"add ":<alias>:" to the commit message (e.g. ":+feature:")"#);
            }
            for line in footer {
                output.push_str(&format!("  {}\n", style(line).italic()));
            }
            output.push('\n');
        }

        output.push_str("This functionality uses emojis defined by gitmoji (https://gitmoji.dev/)\n");
        output
    }
}

fn emoji_info(raw: GitmojiEntry, aliases: Vec<String>) -> EmojiInfo {
    EmojiInfo {
        name: raw.code.replace(':', ""),
        emoji: raw.emoji,
        code: raw.code,
        description: raw.description,
        aliases,
    }
}

/// Emoji and name columns are centered, the others left aligned
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| measure_text_width(h)).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(measure_text_width(cell));
        }
    }

    let pad = |text: &str, width: usize, center: bool| {
        let fill = width.saturating_sub(measure_text_width(text));
        if center {
            format!("{}{}{}", " ".repeat(fill / 2), text, " ".repeat(fill - fill / 2))
        } else {
            format!("{}{}", text, " ".repeat(fill))
        }
    };
    let line = |cells: Vec<String>| format!("│ {} │\n", cells.join(" │ "));

    let mut table = String::new();
    let border: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    table.push_str(&format!("┌─{}─┐\n", border.join("─┬─")));
    table.push_str(&line(
        headers
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (h, w))| pad(h, *w, i < 2))
            .collect(),
    ));
    table.push_str(&format!("├─{}─┤\n", border.join("─┼─")));
    for row in rows {
        table.push_str(&line(
            row.iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (cell, w))| pad(cell, *w, i < 2))
                .collect(),
        ));
    }
    table.push_str(&format!("└─{}─┘\n", border.join("─┴─")));
    table
}

/// Read a message, or the contents of the file it names
pub fn read_message(message_or_file: &str) -> Result<String, ToolError> {
    let path = Path::new(message_or_file);
    if path.is_file() {
        std::fs::read_to_string(path).map_err(|e| ToolError::io(path, e))
    } else {
        Ok(message_or_file.to_string())
    }
}

/// Download fresh gitmoji data files into `dest_dir`
pub async fn update(
    dest_dir: &Path,
    url_base: &str,
    file_names: &[String],
) -> Result<Vec<PathBuf>, ToolError> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| ToolError::io(dest_dir, e))?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("devtools/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let mut written = Vec::new();
    for (index, name) in file_names.iter().enumerate() {
        info!("Downloading '{}' ({} of {})", name, index + 1, file_names.len());

        let url = format!("{}/{}", url_base.trim_end_matches('/'), name);
        let content = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let path = dest_dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::io(&path, e))?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }

    // Categories are not published upstream
    let categories = dest_dir.join(CATEGORIES_FILE);
    if !categories.exists() {
        tokio::fs::write(&categories, EMBEDDED_CATEGORIES)
            .await
            .map_err(|e| ToolError::io(&categories, e))?;
        written.push(categories);
    }
    Ok(written)
}
