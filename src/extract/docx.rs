use once_cell::sync::Lazy;
use regex::{ Captures, Regex };
use std::fs::File;
use std::io::Read;
use std::path::Path;

static PARAGRAPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>|<w:p/>").unwrap());
static TEXT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<w:t(?: [^>]*)?>(.*?)</w:t>").unwrap());

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|lt|gt|quot|apos|amp);").unwrap()
});

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(&['x', 'X'][..]) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

// Single pass, so an escaped ampersand is never decoded twice. Invalid code points stay as written.
fn unescape_xml(text: &str) -> String {
    ENTITY.replace_all(text, |caps: &Captures<'_>| {
        match decode_entity(&caps[1]) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    }).into_owned()
}

/// Paragraph texts of `word/document.xml`, one per line.
pub fn document_xml_text(xml: &str) -> String {
    PARAGRAPH.find_iter(xml)
        .map(|paragraph| {
            TEXT_RUN.captures_iter(paragraph.as_str())
                .map(|run| unescape_xml(&run[1]))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn read_docx_text(path: &Path) -> Result<String, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open document: {}", e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| format!("Failed to read zip: {}", e))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("Missing word/document.xml: {}", e))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(|e| format!("Failed to read document.xml: {}", e))?;
    Ok(document_xml_text(&xml))
}
