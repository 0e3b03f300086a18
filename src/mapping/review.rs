//! Confirmation of proposed mappings.

use std::io::{self, BufRead, Write};

use console::style;

use super::{CollectionMappings, FieldMapping, Transform};

/// What to do with a proposed mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Accept,
    /// Replace the proposal with an edited mapping.
    Edit(FieldMapping),
    /// Drop the source column from the mapping list.
    Reject,
}

pub trait MappingReviewer {
    fn review(&mut self, collection: &str, proposal: &FieldMapping) -> io::Result<ReviewDecision>;

    /// Review every proposal, keeping accepted and edited entries in order.
    fn review_all(&mut self, mappings: CollectionMappings) -> io::Result<CollectionMappings> {
        let mut reviewed = mappings.clone();
        for (collection, mapping) in mappings.collections {
            let mut kept = Vec::with_capacity(mapping.mappings.len());
            for proposal in mapping.mappings {
                match self.review(&collection, &proposal)? {
                    ReviewDecision::Accept => kept.push(proposal),
                    ReviewDecision::Edit(edited) => kept.push(edited),
                    ReviewDecision::Reject => {
                        tracing::debug!(
                            "Rejected mapping {}.{}",
                            mapping.source_table,
                            proposal.source_column
                        );
                    }
                }
            }
            if let Some(entry) = reviewed.collections.get_mut(&collection) {
                entry.mappings = kept;
            }
        }
        Ok(reviewed)
    }
}

/// Accepts every proposal unchanged.
#[derive(Debug, Default)]
pub struct AcceptAll;

impl MappingReviewer for AcceptAll {
    fn review(&mut self, _collection: &str, _proposal: &FieldMapping) -> io::Result<ReviewDecision> {
        Ok(ReviewDecision::Accept)
    }
}

/// Interactive accept / edit / reject prompt.
pub struct ConsoleReviewer<R, W> {
    input: R,
    output: W,
}

impl ConsoleReviewer<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, question: &str) -> io::Result<String> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut line = String::new();
        self.input.read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn edit(&mut self, proposal: &FieldMapping) -> io::Result<FieldMapping> {
        let mut edited = proposal.clone();

        let field = self.prompt(&format!("  Target field [{}]: ", proposal.target_field))?;
        if !field.is_empty() {
            edited.target_field = field;
        }

        let current = proposal.transform.map(|t| t.as_str()).unwrap_or("none");
        loop {
            let answer = self.prompt(&format!("  Transform [{}]: ", current))?;
            if answer.is_empty() {
                break;
            }
            if answer == "none" {
                edited.transform = None;
                break;
            }
            match Transform::from_name(&answer) {
                Some(t) => {
                    edited.transform = Some(t);
                    break;
                }
                None => {
                    let names: Vec<_> = Transform::ALL.iter().map(|t| t.as_str()).collect();
                    writeln!(
                        self.output,
                        "  {} unknown transform, expected one of: none, {}",
                        style("!").yellow(),
                        names.join(", ")
                    )?;
                }
            }
        }
        Ok(edited)
    }
}

impl<R: BufRead, W: Write> MappingReviewer for ConsoleReviewer<R, W> {
    fn review(&mut self, collection: &str, proposal: &FieldMapping) -> io::Result<ReviewDecision> {
        let transform = proposal
            .transform
            .map(|t| format!(" ({})", t.as_str()))
            .unwrap_or_default();
        let relation = proposal
            .relation_to
            .as_ref()
            .map(|r| format!(" -> {}", r))
            .unwrap_or_default();
        writeln!(
            self.output,
            "{} {} → {}.{}{}{}",
            style("?").cyan(),
            style(&proposal.source_column).yellow(),
            collection,
            style(&proposal.target_field).green(),
            transform,
            relation
        )?;

        loop {
            let answer = self.prompt("  [a]ccept, [e]dit, [r]eject? [a] ")?;
            match answer.to_lowercase().as_str() {
                "" | "a" | "accept" | "y" => return Ok(ReviewDecision::Accept),
                "r" | "reject" | "n" => return Ok(ReviewDecision::Reject),
                "e" | "edit" => return Ok(ReviewDecision::Edit(self.edit(proposal)?)),
                _ => writeln!(self.output, "  Please answer a, e or r")?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::CollectionMapping;

    fn proposals() -> CollectionMappings {
        let mut mappings = CollectionMappings::default();
        mappings.insert(
            "music",
            CollectionMapping::new(
                "musics",
                vec![
                    FieldMapping::new("title", "title"),
                    FieldMapping::new("length", "duration"),
                    FieldMapping::new("legacy", "credit"),
                ],
            ),
        );
        mappings
    }

    #[test]
    fn test_accept_all_keeps_everything() {
        let proposed = proposals();
        let reviewed = AcceptAll.review_all(proposed.clone()).unwrap();
        assert_eq!(reviewed, proposed);
    }

    #[test]
    fn test_console_accept_edit_reject() {
        let input = b"\ne\n\nto_number\nr\n".as_slice();
        let mut output = Vec::new();
        let mut reviewer = ConsoleReviewer::new(input, &mut output);

        let reviewed = reviewer.review_all(proposals()).unwrap();
        let music = reviewed.get("music").unwrap();
        assert_eq!(music.mappings.len(), 2);
        assert_eq!(music.mappings[0].source_column, "title");
        assert_eq!(music.mappings[1].target_field, "duration");
        assert_eq!(music.mappings[1].transform, Some(Transform::ToNumber));
        assert!(music.mappings.iter().all(|m| m.source_column != "legacy"));
    }

    #[test]
    fn test_console_reprompts_on_unknown_transform() {
        let input = b"e\nlength_secs\nbogus\nnone\n".as_slice();
        let mut output = Vec::new();
        let mut reviewer = ConsoleReviewer::new(input, &mut output);
        let decision = reviewer
            .review(
                "music",
                &FieldMapping::new("length", "duration").with_transform(Transform::ToNumber),
            )
            .unwrap();
        match decision {
            ReviewDecision::Edit(m) => {
                assert_eq!(m.target_field, "length_secs");
                assert_eq!(m.transform, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(String::from_utf8(output).unwrap().contains("unknown transform"));
    }
}
