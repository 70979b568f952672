//! Line/block-oriented script merge.
//!
//! Scripts cannot be parsed as documents, so the merge works on top-level
//! blocks: named function blocks (a `function`-introducing line through the
//! matching `end`/`until` at the same nesting depth) and table-literal blocks
//! (`name = {` through the matching closing brace). Blocks present in only
//! one contributor pass through; identical blocks (whitespace-collapsed) pass
//! through from the first; differing blocks are resolved by an ordered
//! scoring rule list, with a line-level patch step when two blocks carry
//! complementary feature markers.
//!
//! Scoring rules are configuration, not inline string matches: each
//! [`MarkerRule`] pairs a marker substring with a bonus weight, primary rules
//! outweighing secondary ones. After markers, longer body wins, then more
//! arithmetic operator characters, then more bracket characters, then the
//! earlier contributor (fixed tie-break).

use crate::config::{EngineConfig, MarkerRule};
use crate::merge::MergeInput;
use std::collections::BTreeSet;
use tracing::debug;

/// Category of one extracted block, driving reassembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Table,
    LocalFunction,
    ModuleFunction,
}

#[derive(Debug, Clone)]
struct Block {
    name: String,
    kind: BlockKind,
    lines: Vec<String>,
}

/// Parsed shape of one script contributor.
#[derive(Debug, Default)]
struct ScriptDoc {
    /// Module-level lines that are not blocks, in source order.
    variables: Vec<String>,
    blocks: Vec<Block>,
    /// Module name from a trailing `return <Name>` line, if present.
    module_return: Option<String>,
}

/// Merge script contributors into one reassembled script. Returns `None`
/// only when no contributor is valid UTF-8.
pub fn merge_scripts(inputs: &[MergeInput], config: &EngineConfig) -> Option<Vec<u8>> {
    let docs: Vec<ScriptDoc> = inputs
        .iter()
        .filter_map(|i| std::str::from_utf8(&i.bytes).ok())
        .map(parse_script)
        .collect();
    if docs.is_empty() {
        return None;
    }

    // Module-level variables: union, first-seen by collapsed content.
    let mut variables: Vec<String> = Vec::new();
    let mut seen_vars: BTreeSet<String> = BTreeSet::new();
    for doc in &docs {
        for line in &doc.variables {
            if seen_vars.insert(collapse_whitespace(line)) {
                variables.push(line.clone());
            }
        }
    }

    // Blocks: union by name in first-seen order, resolving differing bodies.
    let mut names: Vec<String> = Vec::new();
    for doc in &docs {
        for block in &doc.blocks {
            if !names.contains(&block.name) {
                names.push(block.name.clone());
            }
        }
    }

    let mut merged_blocks: Vec<Block> = Vec::new();
    for name in &names {
        let candidates: Vec<(usize, &Block)> = docs
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.blocks.iter().find(|b| &b.name == name).map(|b| (i, b)))
            .collect();
        merged_blocks.push(resolve_block(name, &candidates, config));
    }

    let module_return = docs.iter().find_map(|d| d.module_return.clone());

    Some(reassemble(&variables, &merged_blocks, module_return.as_deref()).into_bytes())
}

/// Pick one body for a block present in several contributors.
fn resolve_block(name: &str, candidates: &[(usize, &Block)], config: &EngineConfig) -> Block {
    debug_assert!(!candidates.is_empty());
    if candidates.len() == 1 {
        return candidates[0].1.clone();
    }

    let first = candidates[0].1;
    let first_collapsed = collapse_whitespace(&first.lines.join("\n"));
    if candidates
        .iter()
        .all(|(_, b)| collapse_whitespace(&b.lines.join("\n")) == first_collapsed)
    {
        return first.clone();
    }

    // Differing bodies: deterministic scoring, earlier contributor on ties.
    let mut best: Option<(i64, usize, &Block)> = None;
    for (index, block) in candidates {
        let score = score_block(block, config);
        let better = match &best {
            None => true,
            Some((best_score, best_index, best_block)) => {
                let body = block.lines.join("\n");
                let best_body = best_block.lines.join("\n");
                (score, body.len(), count_chars(&body, ARITHMETIC), count_chars(&body, BRACKETS))
                    .cmp(&(
                        *best_score,
                        best_body.len(),
                        count_chars(&best_body, ARITHMETIC),
                        count_chars(&best_body, BRACKETS),
                    ))
                    .then(best_index.cmp(index))
                    .is_gt()
            }
        };
        if better {
            best = Some((score, *index, block));
        }
    }
    let (_, winner_index, winner) = best.expect("candidates is non-empty");
    let mut merged = winner.clone();

    // Complementary markers: splice each missing feature's lines from the
    // donor into the chosen base instead of discarding the donor.
    for (index, donor) in candidates {
        if *index == winner_index {
            continue;
        }
        splice_missing_markers(&mut merged, donor, config);
    }
    debug!(block = name, winner = winner_index, "script block resolved by scoring");
    merged
}

const ARITHMETIC: &[char] = &['+', '-', '*', '/', '%'];
const BRACKETS: &[char] = &['(', ')', '[', ']', '{', '}'];

fn score_block(block: &Block, config: &EngineConfig) -> i64 {
    let body = block.lines.join("\n");
    let marker_score = |rules: &[MarkerRule]| -> i64 {
        rules
            .iter()
            .filter(|r| body.contains(&r.marker))
            .map(|r| r.weight)
            .sum()
    };
    marker_score(&config.primary_markers) + marker_score(&config.secondary_markers)
}

fn count_chars(body: &str, set: &[char]) -> usize {
    body.chars().filter(|c| set.contains(c)).count()
}

/// Copy the donor's lines for each marker the base lacks, spliced in before
/// the base block's closing line.
fn splice_missing_markers(base: &mut Block, donor: &Block, config: &EngineConfig) {
    let base_body = base.lines.join("\n");
    let donor_body = donor.lines.join("\n");
    let all_markers = config
        .primary_markers
        .iter()
        .chain(config.secondary_markers.iter());

    let mut donated: Vec<String> = Vec::new();
    for rule in all_markers {
        if base_body.contains(&rule.marker) || !donor_body.contains(&rule.marker) {
            continue;
        }
        let matching: Vec<usize> = donor
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.contains(&rule.marker))
            .map(|(i, _)| i)
            .collect();
        let (Some(&start), Some(&end)) = (matching.first(), matching.last()) else {
            continue;
        };
        for line in &donor.lines[start..=end] {
            if !donated.contains(line) {
                donated.push(line.clone());
            }
        }
    }
    if donated.is_empty() {
        return;
    }
    let insert_at = base.lines.len().saturating_sub(1);
    for (offset, line) in donated.into_iter().enumerate() {
        base.lines.insert(insert_at + offset, line);
    }
}

/// Reassemble: module-level variables, table literals, local functions,
/// exported/module functions, trailing re-export.
fn reassemble(variables: &[String], blocks: &[Block], module_return: Option<&str>) -> String {
    let mut sections: Vec<String> = Vec::new();
    if !variables.is_empty() {
        sections.push(variables.join("\n"));
    }
    for kind in [BlockKind::Table, BlockKind::LocalFunction, BlockKind::ModuleFunction] {
        for block in blocks.iter().filter(|b| b.kind == kind) {
            sections.push(block.lines.join("\n"));
        }
    }
    if let Some(name) = module_return {
        sections.push(format!("return {}", name));
    }
    let mut out = sections.join("\n\n");
    out.push('\n');
    out
}

/// Explicit line cursor over a script: `peek`/`advance`/`skip_to`, with the
/// depth-tracking block scans layered on top.
struct LineCursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.pos += 1;
        Some(line)
    }

    fn skip_to(&mut self, predicate: impl Fn(&str) -> bool) {
        while let Some(line) = self.peek() {
            if predicate(line) {
                break;
            }
            self.pos += 1;
        }
    }
}

fn parse_script(text: &str) -> ScriptDoc {
    let mut doc = ScriptDoc::default();
    let mut cursor = LineCursor::new(text);

    loop {
        cursor.skip_to(|l| !l.trim().is_empty());
        let Some(line) = cursor.peek() else { break };
        let trimmed = line.trim();

        if let Some((name, kind)) = function_start(trimmed) {
            let lines = collect_keyword_block(&mut cursor);
            doc.blocks.push(Block { name, kind, lines });
            continue;
        }
        if let Some(name) = table_start(trimmed) {
            let lines = collect_brace_block(&mut cursor);
            doc.blocks.push(Block {
                name,
                kind: BlockKind::Table,
                lines,
            });
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("return ") {
            let name = rest.trim();
            if is_identifier(name) {
                doc.module_return = Some(name.to_string());
                cursor.advance();
                continue;
            }
        }
        doc.variables.push(line.to_string());
        cursor.advance();
    }
    doc
}

/// Collect a `function`-introduced block through the matching `end`/`until`
/// at the same nesting depth.
fn collect_keyword_block(cursor: &mut LineCursor<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut depth = 0i32;
    while let Some(line) = cursor.advance() {
        lines.push(line.to_string());
        depth += keyword_depth_delta(line);
        if depth <= 0 {
            break;
        }
    }
    lines
}

/// Collect a table-literal block through the matching closing brace.
fn collect_brace_block(cursor: &mut LineCursor<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut depth = 0i32;
    while let Some(line) = cursor.advance() {
        lines.push(line.to_string());
        depth += brace_depth_delta(line);
        if depth <= 0 {
            break;
        }
    }
    lines
}

/// Net keyword nesting change of one line: `function`/`if`/`do`/`repeat`
/// open, `end`/`until` close. `for`/`while` are counted through their `do`.
fn keyword_depth_delta(line: &str) -> i32 {
    let code = strip_strings_and_comments(line);
    let mut delta = 0i32;
    for token in tokens(&code) {
        match token {
            "function" | "if" | "do" | "repeat" => delta += 1,
            "end" | "until" => delta -= 1,
            _ => {}
        }
    }
    delta
}

fn brace_depth_delta(line: &str) -> i32 {
    let code = strip_strings_and_comments(line);
    let mut delta = 0i32;
    for ch in code.chars() {
        match ch {
            '{' => delta += 1,
            '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Blank out quoted strings and `--` comments so keyword and brace scans
/// never trip on literal content.
fn strip_strings_and_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut in_string: Option<char> = None;
    while let Some(ch) = chars.next() {
        if let Some(quote) = in_string {
            if ch == '\\' {
                chars.next();
            } else if ch == quote {
                in_string = None;
            }
            out.push(' ');
            continue;
        }
        match ch {
            '"' | '\'' => {
                in_string = Some(ch);
                out.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => break,
            _ => out.push(ch),
        }
    }
    out
}

fn tokens(code: &str) -> impl Iterator<Item = &str> {
    code.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
}

/// Detect a function-introducing line; returns (name, kind).
fn function_start(trimmed: &str) -> Option<(String, BlockKind)> {
    if let Some(rest) = trimmed.strip_prefix("local function ") {
        return Some((leading_name(rest)?, BlockKind::LocalFunction));
    }
    if let Some(rest) = trimmed.strip_prefix("function ") {
        return Some((leading_name(rest)?, BlockKind::ModuleFunction));
    }
    // `name = function(...)` / `local name = function(...)`
    let (lhs, rhs) = trimmed.split_once('=')?;
    if !rhs.trim_start().starts_with("function") {
        return None;
    }
    let (lhs, local) = match lhs.trim().strip_prefix("local ") {
        Some(stripped) => (stripped.trim(), true),
        None => (lhs.trim(), false),
    };
    if !is_name_path(lhs) {
        return None;
    }
    let kind = if local {
        BlockKind::LocalFunction
    } else {
        BlockKind::ModuleFunction
    };
    Some((lhs.to_string(), kind))
}

/// Detect `name = {` / `local name = {` with non-trivial content (a literal
/// `{}` on one line is just a variable declaration).
fn table_start(trimmed: &str) -> Option<String> {
    let without_local = trimmed.strip_prefix("local ").unwrap_or(trimmed);
    let (lhs, rhs) = without_local.split_once('=')?;
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    if !is_name_path(lhs) || !rhs.starts_with('{') {
        return None;
    }
    let body = rhs.trim_start_matches('{').trim();
    if body == "}" || body.is_empty() {
        // `X = {}` or `X = {` followed by nothing on this line: the former is
        // a plain declaration, the latter a real block.
        if rhs == "{" {
            return Some(lhs.to_string());
        }
        return None;
    }
    Some(lhs.to_string())
}

fn leading_name(rest: &str) -> Option<String> {
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':'))
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_name_path(s: &str) -> bool {
    !s.is_empty()
        && s.split(['.', ':'])
            .all(|seg| is_identifier(seg))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
