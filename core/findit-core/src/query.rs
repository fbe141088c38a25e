use crate::error::Result;
use crate::session::Session;
use regex::RegexBuilder;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

const RESULT_COLUMNS: &str =
    "path, filename, size, modified, is_directory, COALESCE(filesystem_type, '')";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchTarget {
    #[default]
    Name,
    Path,
}

impl SearchTarget {
    fn column(self) -> &'static str {
        match self {
            SearchTarget::Name => "filename",
            SearchTarget::Path => "path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileTypeFilter {
    #[default]
    All,
    Files,
    Folders,
}

impl FileTypeFilter {
    /// `"files"` and `"folders"` select one kind; any other label means no filter.
    pub fn from_label(label: &str) -> Self {
        match label {
            "files" => FileTypeFilter::Files,
            "folders" => FileTypeFilter::Folders,
            _ => FileTypeFilter::All,
        }
    }

    fn sql_clause(self) -> &'static str {
        match self {
            FileTypeFilter::All => "",
            FileTypeFilter::Files => " AND is_directory = 0",
            FileTypeFilter::Folders => " AND is_directory = 1",
        }
    }

    fn accepts(self, is_directory: bool) -> bool {
        match self {
            FileTypeFilter::All => true,
            FileTypeFilter::Files => !is_directory,
            FileTypeFilter::Folders => is_directory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub term: String,
    pub match_case: bool,
    pub regex: bool,
    pub target: SearchTarget,
    pub file_type: FileTypeFilter,
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        SearchQuery {
            term: String::new(),
            match_case: false,
            regex: false,
            target: SearchTarget::Name,
            file_type: FileTypeFilter::All,
            limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub filename: String,
    pub size: i64,
    pub modified: i64,
    pub is_directory: bool,
    pub filesystem_type: String,
}

/// Directories first, then filenames ascending, never more than `query.limit` hits.
///
/// In regex mode the candidate window (`limit * regex_oversample` rows) is fetched
/// without the file-type filter; `query.file_type` is then applied to those
/// candidates alongside the pattern, so it holds in both modes.
pub fn search(session: &Session, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    if query.term.is_empty() || query.limit == 0 {
        return Ok(Vec::new());
    }

    if query.regex {
        search_regex(session, query)
    } else {
        search_indexed(session, query)
    }
}

fn search_indexed(session: &Session, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    let column = query.target.column();
    let (predicate, pattern) = if query.match_case {
        (format!("instr({column}, ?1) > 0"), query.term.clone())
    } else {
        (
            format!("{column} LIKE ?1 ESCAPE '\\'"),
            format!("%{}%", escape_like(&query.term)),
        )
    };

    let sql = format!(
        "SELECT {RESULT_COLUMNS} FROM files WHERE {predicate}{} ORDER BY {} LIMIT ?2",
        query.file_type.sql_clause(),
        order_clause(query.match_case),
    );

    let conn = session.lock()?;
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![pattern, sql_limit(query.limit)], hit_from_row)?;

    let mut hits = Vec::new();
    for hit in rows {
        hits.push(hit?);
    }
    Ok(hits)
}

fn search_regex(session: &Session, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    let pattern = RegexBuilder::new(&query.term)
        .case_insensitive(!query.match_case)
        .build()?;
    let oversample = session.settings().regex_oversample.max(1);
    let candidate_limit = query.limit.saturating_mul(oversample);

    let sql = format!(
        "SELECT {RESULT_COLUMNS} FROM files ORDER BY {} LIMIT ?1",
        order_clause(query.match_case),
    );

    let conn = session.lock()?;
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![sql_limit(candidate_limit)], hit_from_row)?;

    let mut hits = Vec::new();
    for hit in rows {
        let hit = hit?;
        if !query.file_type.accepts(hit.is_directory) {
            continue;
        }
        let haystack = match query.target {
            SearchTarget::Name => &hit.filename,
            SearchTarget::Path => &hit.path,
        };
        if pattern.is_match(haystack) {
            hits.push(hit);
            if hits.len() >= query.limit {
                break;
            }
        }
    }
    Ok(hits)
}

fn order_clause(match_case: bool) -> &'static str {
    if match_case {
        "is_directory DESC, filename"
    } else {
        "is_directory DESC, filename COLLATE NOCASE"
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn hit_from_row(row: &Row<'_>) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        path: row.get(0)?,
        filename: row.get(1)?,
        size: row.get(2)?,
        modified: row.get(3)?,
        is_directory: row.get(4)?,
        filesystem_type: row.get(5)?,
    })
}
