// Flat XML dataset documents

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use dbfixture_engine::{
    Dataset, DatasetProperties, DatasetSource, FixtureError, FixtureResult, LoadStrategy, LobRef,
    RowSpec,
};

const ROOT: &[u8] = b"dataset";

/// Reads flat XML datasets.
///
/// ```xml
/// <dataset loadStrategy="REFRESH" resetSequences="emp_seq">
///   <bonus/>
///   <emp id="1" name="Alice"/>
///   <emp id="2"><photo file="photo.png" sizeColumn="photo_size"/></emp>
/// </dataset>
/// ```
///
/// Each element under the root is one row of the table it is named after;
/// its attributes are the row's text values. An element with neither
/// attributes nor LOB children is a delete marker. A child element carrying
/// a `file` attribute is a LOB column named after the child.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetParser;

impl DatasetParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a document held in memory. Relative LOB paths stay relative.
    pub fn parse_str(&self, xml: &str) -> FixtureResult<DatasetSource> {
        parse(xml, None)
    }

    /// Parse a dataset file, resolving LOB paths against its directory.
    pub fn parse_file(&self, path: &Path) -> FixtureResult<DatasetSource> {
        let xml = fs::read_to_string(path).map_err(|e| FixtureError::io(path, e))?;
        let source = parse(&xml, path.parent()).map_err(|e| match e {
            FixtureError::Dataset(msg) => {
                FixtureError::Dataset(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), rows = source.dataset.len(), "dataset parsed");
        Ok(source)
    }
}

fn invalid(msg: impl Into<String>) -> FixtureError {
    FixtureError::Dataset(msg.into())
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

/// Attributes of `e` in document order, entities unescaped.
fn attributes(e: &BytesStart<'_>) -> FixtureResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| invalid(format!("bad attribute on <{}>: {err}", element_name(e))))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| invalid(format!("bad value for {key}: {err}")))?;
        out.push((key, Cow::into_owned(value)));
    }
    Ok(out)
}

fn root_properties(e: &BytesStart<'_>) -> FixtureResult<DatasetProperties> {
    if e.name().as_ref() != ROOT {
        return Err(invalid(format!(
            "root element must be <dataset>, found <{}>",
            element_name(e)
        )));
    }
    let mut properties = DatasetProperties::default();
    for (key, value) in attributes(e)? {
        match key.as_str() {
            "loadStrategy" => properties.load_strategy = Some(value.parse::<LoadStrategy>()?),
            "resetSequences" => {
                properties.reset_sequences = DatasetProperties::parse_sequence_list(&value)
            }
            _ => tracing::debug!(property = %key, "ignoring unknown dataset property"),
        }
    }
    Ok(properties)
}

fn row_spec(e: &BytesStart<'_>) -> FixtureResult<RowSpec> {
    Ok(attributes(e)?.into_iter().collect())
}

fn lob_column(e: &BytesStart<'_>, table: &str, base: Option<&Path>) -> FixtureResult<(String, LobRef)> {
    let column = element_name(e);
    let mut file = None;
    let mut size_column = None;
    for (key, value) in attributes(e)? {
        match key.as_str() {
            "file" => file = Some(value),
            "sizeColumn" => size_column = Some(value),
            _ => {
                return Err(invalid(format!(
                    "table {table}: unexpected attribute {key} on LOB column {column}"
                )))
            }
        }
    }
    let Some(file) = file else {
        return Err(invalid(format!(
            "table {table}: nested element <{column}> is not a LOB reference"
        )));
    };

    let mut path = PathBuf::from(file);
    if path.is_relative() {
        if let Some(base) = base {
            path = base.join(path);
        }
    }
    let mut lob = LobRef::file(path);
    if let Some(size) = size_column {
        lob = lob.with_size_column(size);
    }
    Ok((column, lob))
}

fn parse(xml: &str, base: Option<&Path>) -> FixtureResult<DatasetSource> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut properties: Option<DatasetProperties> = None;
    let mut dataset = Dataset::new();
    let mut root_closed = false;
    // Row element currently open, with the columns gathered so far
    let mut open_row: Option<(String, RowSpec)> = None;
    // Inside a LOB child written as <col file=".."></col>
    let mut in_lob = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| invalid(format!("malformed XML at byte {}: {e}", reader.buffer_position())))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) if properties.is_none() => {
                if root_closed {
                    return Err(invalid("content after the root element"));
                }
                properties = Some(root_properties(e)?);
                if matches!(event, Event::Empty(_)) {
                    root_closed = true;
                }
            }
            Event::Start(ref e) if in_lob => {
                return Err(invalid(format!("unexpected element <{}> inside a LOB column", element_name(e))));
            }
            Event::Empty(ref e) if in_lob => {
                return Err(invalid(format!("unexpected element <{}> inside a LOB column", element_name(e))));
            }
            Event::Start(ref e) | Event::Empty(ref e) if open_row.is_some() => {
                if let Some((table, row)) = open_row.as_mut() {
                    let (column, lob) = lob_column(e, table, base)?;
                    row.set(column, lob);
                }
                if matches!(event, Event::Start(_)) {
                    in_lob = true;
                }
            }
            Event::Start(ref e) => {
                if root_closed {
                    return Err(invalid("content after the root element"));
                }
                open_row = Some((element_name(e), row_spec(e)?));
            }
            Event::Empty(ref e) => {
                if root_closed {
                    return Err(invalid("content after the root element"));
                }
                dataset.push(element_name(e), row_spec(e)?);
            }
            Event::End(_) => {
                if in_lob {
                    in_lob = false;
                } else if let Some((table, row)) = open_row.take() {
                    dataset.push(table, row);
                } else {
                    root_closed = true;
                }
            }
            Event::Text(ref t) => {
                let text = String::from_utf8_lossy(t.as_ref()).to_string();
                return Err(invalid(format!("unexpected text content {text:?}")));
            }
            Event::GeneralRef(ref r) => {
                let name = String::from_utf8_lossy(r).to_string();
                return Err(invalid(format!("unexpected entity reference &{name};")));
            }
            Event::CData(_) => return Err(invalid("unexpected CDATA content")),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let Some(properties) = properties else {
        return Err(invalid("missing root <dataset> element"));
    };
    if !root_closed {
        return Err(invalid("unterminated <dataset> element"));
    }
    Ok(DatasetSource {
        properties,
        dataset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbfixture_engine::{LobSource, SqlValue, Value};

    fn parse_ok(xml: &str) -> DatasetSource {
        DatasetParser::new().parse_str(xml).unwrap()
    }

    #[test]
    fn rows_keep_document_order() {
        let src = parse_ok(
            r#"<dataset>
                 <emp id="1" name="Alice"/>
                 <bonus emp_id="1" amount="5"/>
                 <emp id="2" name="Bob"/>
               </dataset>"#,
        );
        let rows: Vec<_> = src.dataset.iter().map(|(t, r)| (t.to_string(), r.len())).collect();
        assert_eq!(
            rows,
            vec![("emp".into(), 2), ("bonus".into(), 2), ("emp".into(), 2)]
        );
        let (_, first) = src.dataset.iter().next().unwrap();
        assert_eq!(first.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(first.get("name").and_then(Value::as_scalar), Some(&SqlValue::from("Alice")));
    }

    #[test]
    fn empty_elements_are_delete_markers() {
        let src = parse_ok("<dataset><audit/><emp></emp></dataset>");
        let rows: Vec<_> = src.dataset.iter().map(|(t, r)| (t.to_string(), r.is_empty())).collect();
        assert_eq!(rows, vec![("audit".into(), true), ("emp".into(), true)]);
    }

    #[test]
    fn properties_from_root_attributes() {
        let src = parse_ok(r#"<dataset loadStrategy="refresh" resetSequences="emp_seq, bonus_seq"/>"#);
        assert_eq!(src.properties.load_strategy, Some(LoadStrategy::Refresh));
        assert_eq!(src.properties.reset_sequences, vec!["emp_seq", "bonus_seq"]);
        assert!(src.dataset.is_empty());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = DatasetParser::new()
            .parse_str(r#"<dataset loadStrategy="UPSERT"/>"#)
            .unwrap_err();
        assert!(matches!(err, FixtureError::Dataset(_)));
    }

    #[test]
    fn entities_are_unescaped() {
        let src = parse_ok(r#"<dataset><note body="a &amp; b &lt;c&gt;"/></dataset>"#);
        let (_, row) = src.dataset.iter().next().unwrap();
        assert_eq!(row.get("body").and_then(Value::as_scalar), Some(&SqlValue::from("a & b <c>")));
    }

    #[test]
    fn lob_children_become_lob_columns() {
        let src = parse_ok(
            r#"<dataset>
                 <doc id="7"><body file="body.bin" sizeColumn="body_size"/></doc>
               </dataset>"#,
        );
        let (table, row) = src.dataset.iter().next().unwrap();
        assert_eq!(table, "doc");
        match row.get("body") {
            Some(Value::Lob(lob)) => {
                assert_eq!(lob.source, LobSource::File(PathBuf::from("body.bin")));
                assert_eq!(lob.size_column.as_deref(), Some("body_size"));
            }
            other => panic!("expected LOB, got {other:?}"),
        }
    }

    #[test]
    fn nested_non_lob_content_is_rejected() {
        for xml in [
            "<dataset><emp id=\"1\"><name>Alice</name></emp></dataset>",
            "<dataset><emp id=\"1\">Alice</emp></dataset>",
            "<dataset><emp id=\"1\"><photo file=\"a\"><x/></photo></emp></dataset>",
        ] {
            let err = DatasetParser::new().parse_str(xml).unwrap_err();
            assert!(matches!(err, FixtureError::Dataset(_)), "{xml}");
        }
    }

    #[test]
    fn entity_reference_as_content_is_rejected() {
        let err = DatasetParser::new()
            .parse_str("<dataset><emp id=\"1\">&amp;</emp></dataset>")
            .unwrap_err();
        assert!(matches!(err, FixtureError::Dataset(_)));
        assert!(err.to_string().contains("&amp;"), "{err}");
    }

    #[test]
    fn root_must_be_dataset() {
        let err = DatasetParser::new().parse_str("<rows><emp id=\"1\"/></rows>").unwrap_err();
        assert!(err.to_string().contains("root element must be <dataset>"));

        let err = DatasetParser::new().parse_str("").unwrap_err();
        assert!(err.to_string().contains("missing root"));
    }

    #[test]
    fn parse_file_resolves_lob_paths_against_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.xml");
        fs::write(&path, r#"<dataset><doc id="1"><body file="blob.bin"/></doc></dataset>"#).unwrap();

        let src = DatasetParser::new().parse_file(&path).unwrap();
        let (_, row) = src.dataset.iter().next().unwrap();
        match row.get("body") {
            Some(Value::Lob(lob)) => {
                assert_eq!(lob.source, LobSource::File(dir.path().join("blob.bin")))
            }
            other => panic!("expected LOB, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = DatasetParser::new()
            .parse_file(Path::new("/nonexistent/dataset.xml"))
            .unwrap_err();
        assert!(matches!(err, FixtureError::Io { .. }));
    }
}
