//! Acceptance-criteria checklist helpers.
//!
//! The story body carries an "Acceptance Criteria" markdown section whose
//! `- [ ]` lines drive one TDD cycle each.

const SECTION_TITLE: &str = "acceptance criteria";
const UNCHECKED_PREFIX: &str = "- [ ]";

/// Return the body of the "Acceptance Criteria" section, if present.
///
/// The section runs until the next heading of the same or a higher level.
pub fn acceptance_section(content: &str) -> Option<String> {
    let mut level = None;
    let mut body = Vec::new();

    for line in content.lines() {
        let heading = heading_level(line);
        match (level, heading) {
            (None, Some(depth)) if heading_text(line).eq_ignore_ascii_case(SECTION_TITLE) => {
                level = Some(depth);
            }
            (Some(current), Some(depth)) if depth <= current => break,
            (Some(_), _) => body.push(line),
            _ => {}
        }
    }

    level.map(|_| body.join("\n"))
}

/// True iff the story has no acceptance section or it has no unchecked items.
pub fn check_ac_coverage(content: &str) -> bool {
    match acceptance_section(content) {
        None => true,
        Some(section) => !section.lines().any(is_unchecked),
    }
}

/// First unchecked criterion text (without the checkbox), if any.
pub fn first_unchecked_criterion(content: &str) -> Option<String> {
    let section = acceptance_section(content)?;
    section
        .lines()
        .find(|line| is_unchecked(line))
        .map(|line| line.trim()[UNCHECKED_PREFIX.len()..].trim().to_string())
}

fn is_unchecked(line: &str) -> bool {
    line.trim_start().starts_with(UNCHECKED_PREFIX)
}

fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    match trimmed[hashes..].chars().next() {
        None | Some(' ') | Some('\t') => Some(hashes),
        _ => None,
    }
}

fn heading_text(line: &str) -> &str {
    line.trim_start().trim_start_matches('#').trim()
}
