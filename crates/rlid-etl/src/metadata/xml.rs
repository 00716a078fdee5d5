//! Metadata XML normalization and element access.

use std::{collections::HashSet, io::Cursor, sync::LazyLock};

use quick_xml::{
  Reader, Writer,
  events::{BytesEnd, BytesStart, BytesText, Event},
};
use regex::Regex;

use crate::{Error, Result};

pub const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Element holding a record's dataset path.
pub const DATASET_PATH: &[&str] =
  &["metadata", "distinfo", "stdorder", "digform", "digtopt", "onlinopt", "computer", "networka", "networkr"];

static LEADING_DECL: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\s*<\?xml[^>]*\?>\s*").expect("declaration pattern"));

fn local_name(name: &[u8]) -> &[u8] {
  match name.iter().rposition(|&b| b == b':') {
    Some(pos) => &name[pos + 1..],
    None => name,
  }
}

fn xml_error(e: impl std::fmt::Display) -> Error { Error::Xml(e.to_string()) }

/// Canonical declaration, no BOM, entity-escaped smart quotes and none of
/// `orphan_tags`. The result is not checked for well-formedness.
pub fn normalize(xml: &str, orphan_tags: &[String]) -> String {
  let body = xml.trim_start_matches('\u{feff}');
  let body = LEADING_DECL.replace(body, "");
  let body = body.replace(['\u{2018}', '\u{2019}'], "&apos;").replace(['\u{201c}', '\u{201d}'], "&quot;");
  format!("{DECLARATION}\n{}", strip_tags(&body, orphan_tags))
}

/// Remove every start, end and empty tag named in `tags`, keeping their
/// content.
pub fn strip_tags(xml: &str, tags: &[String]) -> String {
  let mut out = xml.to_owned();
  for tag in tags {
    let Ok(pattern) = Regex::new(&format!(r"</?{}(\s[^>]*)?/?>", regex::escape(tag))) else { continue };
    out = pattern.replace_all(&out, "").into_owned();
  }
  out
}

// ─── Streaming passes ────────────────────────────────────────────────────────

/// Walk every event of `xml`, failing on malformed input or unclosed
/// elements.
fn walk<'x>(xml: &'x str, mut visit: impl FnMut(&[String], &Event<'x>) -> Result<()>) -> Result<()> {
  let mut reader = Reader::from_str(xml);
  let mut stack: Vec<String> = Vec::new();
  let mut saw_root = false;
  loop {
    let event = reader.read_event().map_err(xml_error)?;
    match &event {
      Event::Start(e) => {
        saw_root = true;
        visit(&stack, &event)?;
        stack.push(String::from_utf8_lossy(local_name(e.name().as_ref())).into_owned());
      }
      Event::Empty(_) => {
        saw_root = true;
        visit(&stack, &event)?;
      }
      Event::End(_) => {
        stack.pop();
        visit(&stack, &event)?;
      }
      Event::Eof => break,
      _ => visit(&stack, &event)?,
    }
  }
  if !stack.is_empty() {
    return Err(Error::Xml(format!("unclosed element <{}>", stack.join("/"))));
  }
  if !saw_root {
    return Err(Error::Xml("no root element".into()));
  }
  Ok(())
}

/// Fail unless `xml` is a well-formed document.
pub fn check(xml: &str) -> Result<()> { walk(xml, |_, _| Ok(())) }

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<()> {
  writer.write_event(event).map_err(xml_error)
}

fn into_string(writer: Writer<Cursor<Vec<u8>>>) -> Result<String> {
  String::from_utf8(writer.into_inner().into_inner()).map_err(xml_error)
}

/// Inside `secinfo`, rename `secclass` to `secsys` unless that `secinfo`
/// already has a `secsys`.
pub fn collapse_secinfo(xml: &str) -> Result<String> {
  let mut with_secsys = HashSet::new();
  let mut seen = 0usize;
  walk(xml, |stack, event| {
    match event {
      Event::Start(e) | Event::Empty(e) => {
        let name = local_name(e.name().as_ref()).to_vec();
        if name == b"secinfo" {
          seen += 1;
        } else if name == b"secsys" && stack.last().is_some_and(|p| p == "secinfo") {
          with_secsys.insert(seen);
        }
      }
      _ => {}
    }
    Ok(())
  })?;

  let mut writer = Writer::new(Cursor::new(Vec::new()));
  let mut renamed: Vec<bool> = Vec::new();
  let mut secinfo = 0usize;
  walk(xml, |stack, event| {
    let in_secinfo = stack.last().is_some_and(|p| p == "secinfo");
    match event {
      Event::Start(e) | Event::Empty(e) => {
        let name = local_name(e.name().as_ref()).to_vec();
        if name == b"secinfo" {
          secinfo += 1;
        }
        let rename = in_secinfo && name == b"secclass" && !with_secsys.contains(&secinfo);
        let start = if rename {
          let mut s = BytesStart::new("secsys");
          s.extend_attributes(e.attributes().flatten());
          s
        } else {
          e.clone().into_owned()
        };
        if matches!(event, Event::Start(_)) {
          renamed.push(rename);
          write(&mut writer, Event::Start(start))
        } else {
          write(&mut writer, Event::Empty(start))
        }
      }
      Event::End(e) => {
        if renamed.pop().unwrap_or(false) {
          write(&mut writer, Event::End(BytesEnd::new("secsys")))
        } else {
          write(&mut writer, Event::End(e.clone().into_owned()))
        }
      }
      other => write(&mut writer, other.clone().into_owned()),
    }
  })?;
  into_string(writer)
}

fn at_path(stack: &[String], path: &[&str]) -> bool {
  stack.len() == path.len() && stack.iter().zip(path).all(|(a, b)| a == b)
}

/// Text of the first element at `path`, or `None` when there is none.
pub fn element_text(xml: &str, path: &[&str]) -> Result<Option<String>> {
  let mut found: Option<String> = None;
  let mut done = false;
  walk(xml, |stack, event| {
    match event {
      Event::Text(t) if !done && at_path(stack, path) => {
        let text = t.unescape().map_err(xml_error)?;
        found.get_or_insert_with(String::new).push_str(&text);
      }
      Event::CData(t) if !done && at_path(stack, path) => {
        found.get_or_insert_with(String::new).push_str(&String::from_utf8_lossy(t));
      }
      Event::End(_) if found.is_some() && at_path(&stack_with_child(stack), path) => done = true,
      _ => {}
    }
    Ok(())
  })?;
  Ok(found.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()))
}

// `walk` reports an end event with the closed element already popped.
fn stack_with_child(stack: &[String]) -> Vec<String> {
  let mut v = stack.to_vec();
  v.push(String::new());
  v
}

/// Replace the content of every element at `path` with `text`. `None` when
/// the document has no such element.
pub fn set_element_text(xml: &str, path: &[&str], text: &str) -> Result<Option<String>> {
  let mut writer = Writer::new(Cursor::new(Vec::new()));
  let mut found = false;
  // Depth of the element being replaced while its old content is skipped.
  let mut skipping: Option<usize> = None;
  walk(xml, |stack, event| {
    if let Some(depth) = skipping {
      match event {
        Event::End(e) if stack.len() == depth => {
          skipping = None;
          write(&mut writer, Event::End(e.clone().into_owned()))
        }
        _ => Ok(()),
      }
    } else {
      match event {
        Event::Start(e) if at_path(&child_path(stack, e), path) => {
          found = true;
          skipping = Some(stack.len());
          write(&mut writer, Event::Start(e.clone().into_owned()))?;
          write(&mut writer, Event::Text(BytesText::new(text)))
        }
        Event::Empty(e) if at_path(&child_path(stack, e), path) => {
          found = true;
          let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
          write(&mut writer, Event::Start(e.clone().into_owned()))?;
          write(&mut writer, Event::Text(BytesText::new(text)))?;
          write(&mut writer, Event::End(BytesEnd::new(name)))
        }
        other => write(&mut writer, other.clone().into_owned()),
      }
    }
  })?;
  if found { into_string(writer).map(Some) } else { Ok(None) }
}

fn child_path(stack: &[String], e: &BytesStart<'_>) -> Vec<String> {
  let mut v = stack.to_vec();
  v.push(String::from_utf8_lossy(local_name(e.name().as_ref())).into_owned());
  v
}

#[cfg(test)]
mod tests {
  use super::*;

  const RECORD: &str = "<metadata><idinfo><citation>Roads</citation>\
    <secinfo><secclass>Unclassified</secclass></secinfo></idinfo>\
    <distinfo><stdorder><digform><digtopt><onlinopt><computer><networka>\
    <networkr>RLIDGeo.dbo.Road</networkr></networka></computer></onlinopt></digtopt></digform></stdorder></distinfo>\
    </metadata>";

  #[test]
  fn normalization_fixes_declaration_quotes_and_orphans() {
    let raw = "\u{feff}<?xml version='1.0' encoding='windows-1252'?>\n<metadata><abstract>\u{2018}Road\u{2019} \
               \u{201c}centerlines\u{201d}<br/></abstract><stray></metadata>";
    let out = normalize(raw, &["br".to_owned(), "stray".to_owned()]);
    assert!(out.starts_with(DECLARATION));
    assert_eq!(out.matches("<?xml").count(), 1);
    assert!(out.contains("<abstract>&apos;Road&apos; &quot;centerlines&quot;</abstract></metadata>"));
    check(&out).unwrap();
    assert_eq!(element_text(&out, &["metadata", "abstract"]).unwrap().as_deref(), Some("'Road' \"centerlines\""));
  }

  #[test]
  fn malformed_documents_fail_the_check() {
    assert!(check("<metadata><idinfo></metadata>").is_err());
    assert!(check("<metadata>").is_err());
    assert!(check("just text").is_err());
  }

  #[test]
  fn secclass_becomes_secsys_unless_one_exists() {
    let out = collapse_secinfo(RECORD).unwrap();
    assert!(out.contains("<secinfo><secsys>Unclassified</secsys></secinfo>"));

    let both = "<metadata><secinfo><secsys>A</secsys><secclass>B</secclass></secinfo></metadata>";
    assert_eq!(collapse_secinfo(both).unwrap(), both);
  }

  #[test]
  fn dataset_path_element_reads_and_rewrites() {
    assert_eq!(element_text(RECORD, DATASET_PATH).unwrap().as_deref(), Some("RLIDGeo.dbo.Road"));

    let parent = set_element_text(RECORD, DATASET_PATH, "See parent: Transportation").unwrap().unwrap();
    assert_eq!(element_text(&parent, DATASET_PATH).unwrap().as_deref(), Some("See parent: Transportation"));
    assert!(parent.contains("<citation>Roads</citation>"));
    assert!(!parent.contains("RLIDGeo.dbo.Road"));

    assert!(set_element_text("<metadata/>", DATASET_PATH, "x").unwrap().is_none());
  }
}
