//! Identity matching between declared stories and remote entities.
//!
//! An explicit `external_key` always wins. Remaining stories fall back to
//! normalized-title equality; each remote entity is claimed at most once,
//! in declaration order.

use std::collections::HashSet;

use serde::Serialize;

use storysync_core::{EntityKey, EntitySnapshot, Story, Subtask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExternalKey,
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryMatch {
    /// Position in the declared story list.
    pub story_index: usize,
    pub story_id: String,
    pub key: EntityKey,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub matched: Vec<StoryMatch>,
    /// Indices of stories with no remote counterpart.
    pub unmatched_local: Vec<usize>,
    /// Remote entities no story claimed, in remote order.
    pub unmatched_remote: Vec<EntityKey>,
    /// `(story_id, key)` for explicit links to a key an earlier story
    /// already claimed. These stories are left out of the sync.
    pub duplicates: Vec<(String, EntityKey)>,
}

impl MatchReport {
    pub fn key_for(&self, story_index: usize) -> Option<&EntityKey> {
        self.matched
            .iter()
            .find(|m| m.story_index == story_index)
            .map(|m| &m.key)
    }
}

/// Canonical form for title comparison: leading `ABC-123:` id prefix
/// removed, lowercased, punctuation dropped, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = strip_id_prefix(title.trim())
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_id_prefix(title: &str) -> &str {
    let Some((head, rest)) = title.split_once(':') else {
        return title;
    };
    if looks_like_id(head.trim()) {
        rest
    } else {
        title
    }
}

/// `US-001`, `PROJ-12`: a letter-led alphanumeric prefix, a dash, digits.
fn looks_like_id(s: &str) -> bool {
    let Some((prefix, number)) = s.rsplit_once('-') else {
        return false;
    };
    prefix.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && prefix.chars().all(|c| c.is_ascii_alphanumeric())
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

struct Candidate<'a> {
    external_key: Option<&'a EntityKey>,
    title: &'a str,
}

enum Outcome {
    Matched(EntityKey, MatchMethod),
    Duplicate(EntityKey),
    Unmatched,
}

fn match_candidates(candidates: &[Candidate<'_>], remote: &[EntitySnapshot]) -> Vec<Outcome> {
    let mut claimed: HashSet<&EntityKey> = HashSet::new();
    let mut outcomes: Vec<Outcome> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let outcome = match candidate.external_key {
            Some(key) if claimed.insert(key) => Outcome::Matched(key.clone(), MatchMethod::ExternalKey),
            Some(key) => Outcome::Duplicate(key.clone()),
            None => Outcome::Unmatched,
        };
        outcomes.push(outcome);
    }

    let normalized: Vec<String> = remote.iter().map(|r| normalize_title(&r.summary)).collect();
    for (candidate, outcome) in candidates.iter().zip(outcomes.iter_mut()) {
        if !matches!(outcome, Outcome::Unmatched) {
            continue;
        }
        let wanted = normalize_title(candidate.title);
        if wanted.is_empty() {
            continue;
        }
        let found = remote
            .iter()
            .zip(&normalized)
            .find(|(entity, title)| **title == wanted && !claimed.contains(&entity.key));
        if let Some((entity, _)) = found {
            claimed.insert(&entity.key);
            *outcome = Outcome::Matched(entity.key.clone(), MatchMethod::Title);
        }
    }

    outcomes
}

pub fn match_stories(stories: &[Story], remote: &[EntitySnapshot]) -> MatchReport {
    let candidates: Vec<Candidate<'_>> = stories
        .iter()
        .map(|s| Candidate {
            external_key: s.external_key.as_ref(),
            title: &s.title,
        })
        .collect();

    let mut report = MatchReport::default();
    let mut claimed: HashSet<EntityKey> = HashSet::new();
    for (index, outcome) in match_candidates(&candidates, remote).into_iter().enumerate() {
        let story_id = stories[index].id.clone();
        match outcome {
            Outcome::Matched(key, method) => {
                claimed.insert(key.clone());
                report.matched.push(StoryMatch {
                    story_index: index,
                    story_id,
                    key,
                    method,
                });
            }
            Outcome::Duplicate(key) => report.duplicates.push((story_id, key)),
            Outcome::Unmatched => report.unmatched_local.push(index),
        }
    }
    report.unmatched_remote = remote
        .iter()
        .filter(|r| !claimed.contains(&r.key))
        .map(|r| r.key.clone())
        .collect();
    report
}

/// Remote key for each declared subtask, positionally. Duplicate explicit
/// links resolve to `None` past the first.
pub fn match_subtasks(subtasks: &[Subtask], remote: &[EntitySnapshot]) -> Vec<Option<EntityKey>> {
    let candidates: Vec<Candidate<'_>> = subtasks
        .iter()
        .map(|s| Candidate {
            external_key: s.external_key.as_ref(),
            title: &s.title,
        })
        .collect();
    match_candidates(&candidates, remote)
        .into_iter()
        .map(|outcome| match outcome {
            Outcome::Matched(key, _) => Some(key),
            Outcome::Duplicate(_) | Outcome::Unmatched => None,
        })
        .collect()
}
