use chardetng::EncodingDetector;
use chrono::Local;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::import::types::{
    ImportContext, ImportParser, ImportRecord, InvalidRow, ParseError, ParsedImport,
    DEFAULT_CATEGORY,
};

/// Core import fields recognized by column aliases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoreColumn {
    NaturalKey,
    DisplayName,
    Phone,
    Category,
    ReferenceDate,
}

impl CoreColumn {
    const ALL: [CoreColumn; 5] = [
        CoreColumn::NaturalKey,
        CoreColumn::DisplayName,
        CoreColumn::Phone,
        CoreColumn::Category,
        CoreColumn::ReferenceDate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CoreColumn::NaturalKey => "user_id",
            CoreColumn::DisplayName => "nickname",
            CoreColumn::Phone => "phone",
            CoreColumn::Category => "course",
            CoreColumn::ReferenceDate => "learning_date",
        }
    }

    fn default_aliases(&self) -> &'static [&'static str] {
        match self {
            CoreColumn::NaturalKey => &["用户ID", "user_id", "User ID", "userid", "UserID"],
            CoreColumn::DisplayName => {
                &["昵称", "nickname", "Nickname", "姓名", "name", "用户昵称"]
            }
            CoreColumn::Phone => &["手机号", "phone", "Phone", "电话", "mobile"],
            CoreColumn::Category => &["课程", "course", "Course", "课程名称", "course_name"],
            CoreColumn::ReferenceDate => &[
                "学习日期",
                "learning_date",
                "Learning Date",
                "报名日期",
                "register_date",
                "日期",
                "date",
            ],
        }
    }
}

/// Default import parser for comma-separated files
#[derive(Debug, Clone)]
pub struct CsvImportParser {
    aliases: BTreeMap<CoreColumn, Vec<String>>,
}

impl Default for CsvImportParser {
    fn default() -> Self {
        let aliases = CoreColumn::ALL
            .iter()
            .map(|column| {
                (
                    *column,
                    column
                        .default_aliases()
                        .iter()
                        .map(|alias| alias.to_string())
                        .collect(),
                )
            })
            .collect();
        Self { aliases }
    }
}

impl CsvImportParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an additional header name for a core column
    pub fn with_alias(mut self, column: CoreColumn, alias: impl Into<String>) -> Self {
        self.aliases.entry(column).or_default().push(alias.into());
        self
    }

    /// First header (in file order) that is a known alias of `column`
    fn locate(&self, column: CoreColumn, headers: &[String]) -> Option<usize> {
        let aliases = self.aliases.get(&column)?;
        headers
            .iter()
            .position(|header| aliases.iter().any(|alias| alias == header))
    }
}

/// Decode bytes as UTF-8, falling back to detected encoding (e.g. GBK exports)
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    if let Ok(content) = std::str::from_utf8(bytes) {
        return (content.to_string(), "UTF-8");
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(
            "Decoding errors occurred while reading import with encoding {}",
            encoding.name()
        );
    }

    (decoded.into_owned(), encoding.name())
}

fn cell<'a>(row: &'a csv::StringRecord, index: Option<usize>) -> Option<&'a str> {
    index
        .and_then(|i| row.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl ImportParser for CsvImportParser {
    fn parse(
        &self,
        raw: &[u8],
        filename: &str,
        context: &ImportContext,
    ) -> Result<ParsedImport, ParseError> {
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::Empty);
        }

        if let Some(extension) = Path::new(filename).extension().and_then(|e| e.to_str()) {
            if !matches!(extension.to_ascii_lowercase().as_str(), "csv" | "txt") {
                return Err(ParseError::UnsupportedFormat(extension.to_string()));
            }
        }

        let (text, encoding) = decode_text(raw);
        info!("Parsing {} ({})", filename, encoding);

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        debug!("Import columns: {:?}", headers);

        let mut located = BTreeMap::new();
        let mut missing_columns = Vec::new();
        for column in CoreColumn::ALL {
            match self.locate(column, &headers) {
                Some(index) => {
                    located.insert(column, index);
                }
                None => missing_columns.push(column.name().to_string()),
            }
        }

        for required in [CoreColumn::NaturalKey, CoreColumn::DisplayName] {
            if !located.contains_key(&required) {
                return Err(ParseError::MissingColumn(required.name().to_string()));
            }
        }
        if !missing_columns.is_empty() {
            warn!("Import has no column for: {}", missing_columns.join(", "));
        }

        let core_indexes: Vec<usize> = located.values().copied().collect();
        let today = Local::now().format("%Y-%m-%d").to_string();

        let mut records = Vec::new();
        let mut invalid_rows = Vec::new();

        for (index, result) in reader.records().enumerate() {
            let row_number = index + 1;
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    invalid_rows.push(InvalidRow {
                        row: row_number,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if row.iter().all(|value| value.trim().is_empty()) {
                continue;
            }

            let column = |c: CoreColumn| cell(&row, located.get(&c).copied());

            let Some(natural_key) = column(CoreColumn::NaturalKey) else {
                invalid_rows.push(InvalidRow {
                    row: row_number,
                    error: "user id is empty".to_string(),
                });
                continue;
            };
            let Some(display_name) = column(CoreColumn::DisplayName) else {
                invalid_rows.push(InvalidRow {
                    row: row_number,
                    error: "nickname is empty".to_string(),
                });
                continue;
            };

            let category = context
                .category
                .clone()
                .or_else(|| column(CoreColumn::Category).map(str::to_string))
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            let reference_date = context
                .reference_date
                .clone()
                .or_else(|| column(CoreColumn::ReferenceDate).map(str::to_string))
                .unwrap_or_else(|| today.clone());

            let attributes = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| !core_indexes.contains(i))
                .filter_map(|(i, header)| {
                    cell(&row, Some(i)).map(|value| (header.clone(), value.to_string()))
                })
                .collect();

            records.push(ImportRecord {
                natural_key: natural_key.to_string(),
                display_name: display_name.to_string(),
                phone: column(CoreColumn::Phone).map(str::to_string),
                attributes,
                category,
                reference_date,
            });
        }

        for invalid in &invalid_rows {
            warn!("Row {} rejected: {}", invalid.row, invalid.error);
        }
        info!(
            "✓ Parsed {} valid row(s), {} invalid",
            records.len(),
            invalid_rows.len()
        );

        Ok(ParsedImport {
            records,
            invalid_rows,
            missing_columns,
        })
    }
}
