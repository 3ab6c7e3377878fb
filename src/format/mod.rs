//! Markdown-ish model output to embeddable HTML.
//!
//! The pipeline is a fixed, ordered list of independent rules. Later rules see the
//! output of earlier ones, so the order in [`RULES`] is part of the behavior.

use once_cell::sync::Lazy;
use regex::{ Captures, Regex };

enum Substitution {
    /// Regex replacement template applied to every match.
    Template(&'static str),
    /// Per-match function; `None` keeps the matched text as-is.
    Guarded(fn(&str, &Captures<'_>) -> Option<String>),
    /// Whole-line rule. Contiguous matching lines become `<li>` items inside one container.
    LineRun {
        container: &'static str,
    },
}

pub struct Rule {
    name: &'static str,
    pattern: Regex,
    substitution: Substitution,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, substitution: Substitution) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("reformatter pattern must compile"),
            substitution,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, text: &str) -> String {
        match &self.substitution {
            Substitution::Template(template) => {
                self.pattern.replace_all(text, *template).into_owned()
            }
            Substitution::Guarded(substitute) => {
                let mut out = String::with_capacity(text.len());
                let mut copied = 0;
                let mut pos = 0;
                while let Some(caps) = self.pattern.captures_at(text, pos) {
                    let Some(whole) = caps.get(0) else {
                        break;
                    };
                    match substitute(text, &caps) {
                        Some(replacement) => {
                            out.push_str(&text[copied..whole.start()]);
                            out.push_str(&replacement);
                            copied = whole.end();
                            pos = whole.end();
                        }
                        // A rejected match gives its closing delimiter back to the search.
                        None => {
                            let first = text[whole.start()..].chars().next().map_or(1, char::len_utf8);
                            pos = whole.start() + first;
                        }
                    }
                }
                out.push_str(&text[copied..]);
                out
            }
            Substitution::LineRun { container } => {
                let mut lines: Vec<String> = Vec::new();
                let mut run: Vec<String> = Vec::new();
                for line in text.split('\n') {
                    match self.pattern.captures(line) {
                        Some(caps) => run.push(format!("<li>{}</li>", &caps[1])),
                        None => {
                            close_run(&mut lines, &mut run, container);
                            lines.push(line.to_string());
                        }
                    }
                }
                close_run(&mut lines, &mut run, container);
                lines.join("\n")
            }
        }
    }
}

fn close_run(lines: &mut Vec<String>, run: &mut Vec<String>, container: &str) {
    if run.is_empty() {
        return;
    }
    lines.push(format!("<{container}>{}</{container}>", run.join("\n")));
    run.clear();
}

// A single asterisk touching another one belongs to a bold delimiter that rule 1
// could not pair; wrapping it in <em> would split that delimiter.
fn italic(text: &str, caps: &Captures<'_>) -> Option<String> {
    let whole = caps.get(0)?;
    let before = text[..whole.start()].chars().next_back();
    let after = text[whole.end()..].chars().next();
    if before == Some('*') || after == Some('*') {
        return None;
    }
    Some(format!("<em>{}</em>", &caps[1]))
}

pub static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new("bold", r"\*\*(.*?)\*\*", Substitution::Template("<strong>${1}</strong>")),
        Rule::new("italic", r"\*([^*\n]+?)\*", Substitution::Guarded(italic)),
        Rule::new("math", r"\$(.*?)\$", Substitution::Template(r#"<div class="math">${1}</div>"#)),
        Rule::new("code", r"(?s)```(.*?)```", Substitution::Template(r#"<pre class="code">${1}</pre>"#)),
        Rule::new("bullet_list", r"^- (.*)$", Substitution::LineRun { container: "ul" }),
        Rule::new("numbered_list", r"^\d+\. (.*)$", Substitution::LineRun { container: "ol" }),
        Rule::new("line_break", r"\n\n", Substitution::Template("<br>")),
    ]
});

#[cfg(test)]
fn rule(name: &str) -> Option<&'static Rule> {
    RULES.iter().find(|r| r.name == name)
}

/// Converts a raw model reply into an HTML fragment. Never fails; text without
/// recognized markers only has its blank lines turned into `<br>`.
pub fn format_response(raw: &str) -> String {
    RULES.iter().fold(raw.to_string(), |text, rule| rule.apply(&text))
}
