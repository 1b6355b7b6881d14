//! Minimal STEP (ISO-10303-21) reader for IFC exchange files.
//!
//! This is not a schema-aware IFC parser. It extracts exactly what the
//! GLB export needs: the schema identifier, the project name, and every
//! three-dimensional `IFCCARTESIANPOINT` in the DATA section.

use crate::errors::ConvertError;

#[derive(Debug)]
pub struct StepModel {
    pub schema: Option<String>,
    pub project_name: Option<String>,
    pub points: Vec<[f32; 3]>,
    pub entity_count: usize,
}

struct Statement {
    line: usize,
    text: String,
}

pub fn parse_step(input: &str) -> Result<StepModel, ConvertError> {
    let trimmed = input.trim_start_matches('\u{feff}').trim_start();
    if !trimmed.starts_with("ISO-10303-21;") {
        return Err(ConvertError::MissingHeader);
    }

    let statements = split_statements(trimmed);

    let mut schema = None;
    let mut project_name = None;
    let mut points = Vec::new();
    let mut entity_count = 0usize;
    let mut in_data = false;
    let mut saw_data = false;

    for stmt in &statements {
        let text = stmt.text.trim();
        if text.is_empty() {
            continue;
        }
        if text == "DATA" {
            in_data = true;
            saw_data = true;
            continue;
        }
        if text == "ENDSEC" {
            in_data = false;
            continue;
        }
        if !in_data {
            if let Some(args) = keyword_args(text, "FILE_SCHEMA") {
                schema = first_quoted(&args);
            }
            continue;
        }
        if !text.starts_with('#') {
            continue;
        }

        entity_count += 1;
        let (keyword, args) = parse_entity(text, stmt.line)?;
        match keyword.as_str() {
            "IFCCARTESIANPOINT" => {
                if let Some(point) = parse_point(&args, stmt.line)? {
                    points.push(point);
                }
            }
            "IFCPROJECT" => {
                if project_name.is_none() {
                    project_name = entity_name(&args);
                }
            }
            _ => {}
        }
    }

    if !saw_data {
        return Err(ConvertError::MissingDataSection);
    }

    Ok(StepModel {
        schema,
        project_name,
        points,
        entity_count,
    })
}

/// Splits the raw text into `;`-terminated statements, honoring STEP
/// string literals (apostrophe-quoted, doubled apostrophe escapes).
fn split_statements(input: &str) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut line = 1usize;
    let mut start_line = 1usize;
    let mut in_string = false;

    for ch in input.chars() {
        if ch == '\n' {
            line += 1;
        }
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            ';' if !in_string => {
                statements.push(Statement {
                    line: start_line,
                    text: std::mem::take(&mut current),
                });
                start_line = line;
            }
            _ => {
                if current.is_empty() && ch.is_whitespace() {
                    start_line = line;
                } else {
                    current.push(ch);
                }
            }
        }
    }
    statements
}

/// Returns the parenthesized argument text when `stmt` starts with `keyword`.
fn keyword_args(stmt: &str, keyword: &str) -> Option<String> {
    let rest = stmt.strip_prefix(keyword)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.to_string())
}

fn first_quoted(args: &str) -> Option<String> {
    let open = args.find('\'')?;
    let rest = &args[open + 1..];
    let close = rest.find('\'')?;
    Some(rest[..close].to_string())
}

/// Parses `#N=KEYWORD(args)` into the uppercased keyword and raw args.
fn parse_entity(stmt: &str, line: usize) -> Result<(String, Vec<String>), ConvertError> {
    let eq = stmt.find('=').ok_or_else(|| ConvertError::MalformedEntity {
        line,
        message: "expected '=' after entity id".to_string(),
    })?;
    let body = stmt[eq + 1..].trim();
    let open = body.find('(').ok_or_else(|| ConvertError::MalformedEntity {
        line,
        message: "expected '(' after entity keyword".to_string(),
    })?;
    let keyword = body[..open].trim().to_ascii_uppercase();
    let inner = body[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| ConvertError::MalformedEntity {
            line,
            message: "unterminated argument list".to_string(),
        })?;
    Ok((keyword, split_args(inner)))
}

/// Splits an argument list at top level, respecting nesting and strings.
fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;

    for ch in inner.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            '(' if !in_string => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_string => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if !in_string && depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// `IFCCARTESIANPOINT` carries one aggregate argument: `(x,y[,z])`.
/// Two-dimensional points (profile definitions) carry no exportable
/// geometry and are skipped.
fn parse_point(args: &[String], line: usize) -> Result<Option<[f32; 3]>, ConvertError> {
    let aggregate = args.first().ok_or_else(|| ConvertError::MalformedEntity {
        line,
        message: "cartesian point has no coordinate list".to_string(),
    })?;
    let inner = aggregate
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| ConvertError::MalformedEntity {
            line,
            message: "coordinate list is not parenthesized".to_string(),
        })?;

    let mut coords = Vec::with_capacity(3);
    for raw in inner.split(',') {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| ConvertError::MalformedEntity {
                line,
                message: format!("invalid coordinate '{}'", raw.trim()),
            })?;
        coords.push(value as f32);
    }

    match coords.as_slice() {
        [x, y, z] => Ok(Some([*x, *y, *z])),
        [_, _] => Ok(None),
        other => Err(ConvertError::MalformedEntity {
            line,
            message: format!("expected 2 or 3 coordinates, found {}", other.len()),
        }),
    }
}

/// The entity Name attribute sits third for rooted IFC entities
/// (GlobalId, OwnerHistory, Name, ...). `$` marks an unset attribute.
fn entity_name(args: &[String]) -> Option<String> {
    let raw = args.get(2)?;
    let inner = raw.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.is_empty() {
        None
    } else {
        Some(inner.replace("''", "'"))
    }
}
