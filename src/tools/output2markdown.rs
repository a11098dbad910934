//! Convert console output into a Markdown-embeddable HTML block

use crate::core::command::CommandDescriptor;
use crate::process::{CommandRunner, OutputSink};
use crate::tools::ToolError;
use console::AnsiCodeIterator;
use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;
use tracing::debug;

const PRE_OPEN: &str = r#"<pre style="background-color: black; color: #AAAAAA; font-size: .75em">"#;
const PRE_CLOSE: &str = "</pre>";

const STANDARD_COLORS: [&str; 8] = [
    "#000316", "#aa0000", "#00aa00", "#aa5500", "#0000aa", "#E850A8", "#00aaaa", "#F5F1DE",
];
const BRIGHT_COLORS: [&str; 8] = [
    "#7f7f7f", "#ff0000", "#00ff00", "#ffff00", "#5c5cff", "#ff00ff", "#00ffff", "#ffffff",
];

/// Result of running a command and converting its output
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub exit_code: i32,
    pub html: String,
}

/// Run `command`, echoing its output to `echo`, and convert what it printed
pub async fn execute(
    runner: &dyn CommandRunner,
    command: &CommandDescriptor,
    echo: Option<&dyn OutputSink>,
) -> Result<Conversion, ToolError> {
    debug!("Running {}", command.display());
    let output = runner.run(command, echo).await?;

    Ok(Conversion {
        exit_code: output.exit_code,
        html: to_markdown(&output.output),
    })
}

/// Convert ANSI-styled text into the `<pre>` block
pub fn to_markdown(output: &str) -> String {
    let html = ansi_to_html(output);
    let lines: Vec<String> = html
        .trim_end()
        .split('\n')
        .map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                "&nbsp;".to_string()
            } else {
                line.to_string()
            }
        })
        .collect();

    format!("{}{}{}", PRE_OPEN, lines.join("\n"), PRE_CLOSE)
}

/// Surround converted content with the rulers printed to the terminal
pub fn render_block(content: &str) -> String {
    format!(
        "\n\nBEGIN MARKDOWN\n--------------\n{}\n--------------\nEND MARKDOWN\n\n",
        content
    )
}

#[derive(Debug, Clone, Default, PartialEq)]
struct SgrState {
    foreground: Option<String>,
    background: Option<String>,
    bold: bool,
    italic: bool,
    underline: bool,
}

impl SgrState {
    fn css(&self) -> String {
        let mut parts = Vec::new();
        if let Some(color) = &self.foreground {
            parts.push(format!("color: {}", color));
        }
        if let Some(color) = &self.background {
            parts.push(format!("background-color: {}", color));
        }
        if self.bold {
            parts.push("font-weight: bold".to_string());
        }
        if self.italic {
            parts.push("font-style: italic".to_string());
        }
        if self.underline {
            parts.push("text-decoration: underline".to_string());
        }
        parts.join("; ")
    }

    fn apply(&mut self, sequence: &str) {
        // Only SGR sequences (`ESC [ ... m`) carry styles
        let Some(params) = sequence
            .strip_prefix("\x1b[")
            .and_then(|rest| rest.strip_suffix('m'))
        else {
            return;
        };

        let codes: Vec<u32> = params
            .split(';')
            .map(|code| code.parse().unwrap_or(0))
            .collect();

        let mut index = 0;
        while index < codes.len() {
            let code = codes[index];
            match code {
                0 => *self = Self::default(),
                1 => self.bold = true,
                3 => self.italic = true,
                4 => self.underline = true,
                22 => self.bold = false,
                23 => self.italic = false,
                24 => self.underline = false,
                30..=37 => self.foreground = Some(STANDARD_COLORS[(code - 30) as usize].to_string()),
                39 => self.foreground = None,
                40..=47 => self.background = Some(STANDARD_COLORS[(code - 40) as usize].to_string()),
                49 => self.background = None,
                90..=97 => self.foreground = Some(BRIGHT_COLORS[(code - 90) as usize].to_string()),
                100..=107 => self.background = Some(BRIGHT_COLORS[(code - 100) as usize].to_string()),
                38 | 48 => {
                    let (color, consumed) = extended_color(&codes[index + 1..]);
                    if code == 38 {
                        self.foreground = color;
                    } else {
                        self.background = color;
                    }
                    index += consumed;
                }
                _ => {}
            }
            index += 1;
        }
    }
}

/// Parse the tail of a `38;...`/`48;...` sequence. Returns the color and the
/// number of parameters consumed.
fn extended_color(params: &[u32]) -> (Option<String>, usize) {
    match params {
        [5, n, ..] => (Some(palette_color(*n)), 2),
        [2, r, g, b, ..] => (
            Some(format!("#{:02x}{:02x}{:02x}", r.min(&255), g.min(&255), b.min(&255))),
            4,
        ),
        _ => (None, params.len()),
    }
}

fn palette_color(index: u32) -> String {
    match index {
        0..=7 => STANDARD_COLORS[index as usize].to_string(),
        8..=15 => BRIGHT_COLORS[(index - 8) as usize].to_string(),
        16..=231 => {
            const LEVELS: [u32; 6] = [0, 95, 135, 175, 215, 255];
            let cube = index - 16;
            format!(
                "#{:02x}{:02x}{:02x}",
                LEVELS[(cube / 36) as usize],
                LEVELS[((cube / 6) % 6) as usize],
                LEVELS[(cube % 6) as usize]
            )
        }
        _ => {
            let level = 8 + 10 * (index.min(255) - 232);
            format!("#{:02x}{:02x}{:02x}", level, level, level)
        }
    }
}

fn url_regex() -> Option<&'static Regex> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).ok())
        .as_ref()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn linkify(text: &str) -> String {
    let Some(regex) = url_regex() else {
        return escape_html(text);
    };

    let mut html = String::new();
    let mut last = 0;
    for found in regex.find_iter(text) {
        html.push_str(&escape_html(&text[last..found.start()]));
        let url = escape_html(found.as_str());
        let _ = write!(html, r#"<a href="{}">{}</a>"#, url, url);
        last = found.end();
    }
    html.push_str(&escape_html(&text[last..]));
    html
}

/// Convert ANSI escape sequences to inline-styled `<span>`s
pub fn ansi_to_html(text: &str) -> String {
    let mut state = SgrState::default();
    let mut html = String::new();

    for (chunk, is_ansi) in AnsiCodeIterator::new(text) {
        if is_ansi {
            state.apply(chunk);
            continue;
        }

        let css = state.css();
        // Spans never cross lines so that each line can be trimmed on its own
        for (index, line) in chunk.split('\n').enumerate() {
            if index > 0 {
                html.push('\n');
            }
            if line.is_empty() {
                continue;
            }
            if css.is_empty() {
                html.push_str(&linkify(line));
            } else {
                let _ = write!(html, r#"<span style="{}">{}</span>"#, css, linkify(line));
            }
        }
    }
    html
}
