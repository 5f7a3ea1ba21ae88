use anyhow::{bail, Context, Result};
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use std::{fs, path::Path};

const SUPPORTED_VERSIONS: &[u8] = b"supportedVersions";
const LIST_ITEM: &[u8] = b"li";
const BOM: char = '\u{feff}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionEdit {
    AlreadyListed,
    Added { xml: String, created_list: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AboutUpdate {
    Missing,
    AlreadyListed,
    Added { created_list: bool },
}

/// Adds `version` to `<supportedVersions>` in About.xml, rewriting the file in place.
pub fn update_about_xml(path: &Path, version: &str) -> Result<AboutUpdate> {
    if !path.is_file() {
        return Ok(AboutUpdate::Missing);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let edit = add_supported_version(&raw, version)
        .with_context(|| format!("update {}", path.display()))?;
    match edit {
        VersionEdit::AlreadyListed => Ok(AboutUpdate::AlreadyListed),
        VersionEdit::Added { xml, created_list } => {
            fs::write(path, xml).with_context(|| format!("write {}", path.display()))?;
            Ok(AboutUpdate::Added { created_list })
        }
    }
}

/// Rewrites the document event by event so untouched markup, comments and
/// whitespace survive unchanged. Only the new `<li>` (and, if needed, the
/// enclosing `<supportedVersions>`) is inserted.
pub fn add_supported_version(raw: &str, version: &str) -> Result<VersionEdit> {
    let has_bom = raw.starts_with(BOM);
    let body = raw.trim_start_matches(BOM);

    let mut reader = Reader::from_str(body);
    let mut writer = Writer::new(Vec::new());

    let mut depth = 0usize;
    let mut in_list = false;
    let mut in_item = false;
    let mut listed = false;
    let mut saw_list = false;
    let mut saw_root = false;
    let mut inserted = false;
    let mut created_list = false;
    let mut pending_ws = String::new();
    let mut item_ws: Option<String> = None;
    let mut child_ws: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("parse xml at byte {}", reader.buffer_position()))?;

        if let Event::Text(text) = &event {
            if text.iter().all(|byte| byte.is_ascii_whitespace()) {
                pending_ws.push_str(&String::from_utf8_lossy(text));
                continue;
            }
            if in_item && text.unescape()?.trim() == version {
                listed = true;
            }
        }

        match &event {
            Event::Start(start) => {
                depth += 1;
                if depth == 1 {
                    saw_root = true;
                }
                if depth == 2 && child_ws.is_none() {
                    child_ws = Some(pending_ws.clone());
                }
                if start.name().as_ref() == SUPPORTED_VERSIONS {
                    in_list = true;
                    saw_list = true;
                } else if in_list && start.name().as_ref() == LIST_ITEM {
                    in_item = true;
                    if item_ws.is_none() {
                        item_ws = Some(pending_ws.clone());
                    }
                }
            }
            Event::Empty(empty) => {
                if depth == 0 && !saw_root {
                    saw_root = true;
                    let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                    flush_ws(&mut writer, &mut pending_ws)?;
                    writer
                        .write_event(Event::Start(empty.clone()))
                        .context("write root element")?;
                    write_raw(&mut writer, "\n  ")?;
                    write_list(&mut writer, "\n  ", "\n    ", version)?;
                    write_raw(&mut writer, "\n")?;
                    writer
                        .write_event(Event::End(BytesEnd::new(name)))
                        .context("write root element")?;
                    inserted = true;
                    created_list = true;
                    saw_list = true;
                    continue;
                }
                if depth == 1 && child_ws.is_none() {
                    child_ws = Some(pending_ws.clone());
                }
                if empty.name().as_ref() == SUPPORTED_VERSIONS && !saw_list {
                    saw_list = true;
                    let base = pending_ws.clone();
                    flush_ws(&mut writer, &mut pending_ws)?;
                    write_list(&mut writer, &base, &format!("{base}  "), version)?;
                    inserted = true;
                    continue;
                }
            }
            Event::End(end) => {
                let name = end.name();
                if name.as_ref() == LIST_ITEM {
                    in_item = false;
                } else if name.as_ref() == SUPPORTED_VERSIONS && in_list {
                    in_list = false;
                    if !listed && !inserted {
                        let indent = item_ws.clone().unwrap_or_default();
                        write_raw(&mut writer, &indent)?;
                        write_item(&mut writer, version)?;
                        inserted = true;
                    }
                } else if depth == 1 && !saw_list {
                    let base = child_ws.clone().unwrap_or_else(|| "\n  ".to_string());
                    write_raw(&mut writer, &base)?;
                    write_list(&mut writer, &base, &format!("{base}  "), version)?;
                    inserted = true;
                    created_list = true;
                    saw_list = true;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }

        flush_ws(&mut writer, &mut pending_ws)?;
        writer.write_event(event).context("write xml event")?;
    }
    flush_ws(&mut writer, &mut pending_ws)?;

    if !saw_root {
        bail!("document has no root element");
    }
    if listed {
        return Ok(VersionEdit::AlreadyListed);
    }
    if !inserted {
        bail!("could not place <supportedVersions> in document");
    }

    let mut xml = String::from_utf8(writer.into_inner()).context("xml output is not utf-8")?;
    if has_bom {
        xml.insert(0, BOM);
    }
    Ok(VersionEdit::Added { xml, created_list })
}

/// Walks the whole document; returns the first parse problem, if any.
pub fn check_well_formed(raw: &str) -> std::result::Result<(), String> {
    let mut reader = Reader::from_str(raw.trim_start_matches(BOM));
    let mut depth = 0usize;
    let mut roots = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) if depth == 0 => roots += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(format!("{err} at byte {}", reader.buffer_position()));
            }
        }
    }
    if depth != 0 {
        return Err(format!("{depth} element(s) left unclosed"));
    }
    match roots {
        0 => Err("no root element".to_string()),
        1 => Ok(()),
        n => Err(format!("{n} root elements")),
    }
}

fn write_list(writer: &mut Writer<Vec<u8>>, base: &str, inner: &str, version: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("supportedVersions")))
        .context("write supportedVersions")?;
    write_raw(writer, inner)?;
    write_item(writer, version)?;
    write_raw(writer, base)?;
    writer
        .write_event(Event::End(BytesEnd::new("supportedVersions")))
        .context("write supportedVersions")?;
    Ok(())
}

fn write_item(writer: &mut Writer<Vec<u8>>, version: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("li")))
        .context("write li")?;
    writer
        .write_event(Event::Text(BytesText::new(version)))
        .context("write li")?;
    writer
        .write_event(Event::End(BytesEnd::new("li")))
        .context("write li")?;
    Ok(())
}

fn write_raw(writer: &mut Writer<Vec<u8>>, ws: &str) -> Result<()> {
    if ws.is_empty() {
        return Ok(());
    }
    writer
        .write_event(Event::Text(BytesText::from_escaped(ws)))
        .context("write whitespace")
}

fn flush_ws(writer: &mut Writer<Vec<u8>>, pending: &mut String) -> Result<()> {
    let ws = std::mem::take(pending);
    write_raw(writer, &ws)
}
