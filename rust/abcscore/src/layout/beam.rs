//! Beam grouping: which short notes of a measure share a beam.

use serde::Serialize;

use crate::model::{NodeId, NodeKind, ScoreTree};
use crate::ticks::{Ticks, TimeUnit};

/// Notes joined by one beam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeamGroup {
    pub elements: Vec<NodeId>,
    /// Number of beam lines: the largest flag count among the members
    pub beams: u32,
}

/// Flags on a note of `duration`: how many times it can be doubled and
/// still not exceed a quarter. At least one for anything shorter than a
/// quarter.
pub fn flag_count(duration: Ticks, quarter: Ticks) -> u32 {
    if duration == 0 || duration >= quarter {
        return 0;
    }
    let mut value = duration;
    let mut flags = 0;
    while value * 2 <= quarter {
        value *= 2;
        flags += 1;
    }
    flags.max(1)
}

struct Run {
    members: Vec<(NodeId, Ticks)>,
    beat: Ticks,
}

impl Run {
    fn flush(&mut self, quarter: Ticks, groups: &mut Vec<BeamGroup>) {
        if self.members.len() >= 2 {
            let beams = self.members.iter().map(|&(_, d)| flag_count(d, quarter)).max().unwrap_or(1);
            groups.push(BeamGroup { elements: self.members.iter().map(|&(id, _)| id).collect(), beams });
        }
        self.members.clear();
    }
}

/// Group a measure's notes into beams.
///
/// A run collects consecutive notes (and chords) shorter than a quarter.
/// It ends at any other element, at a note of a quarter or longer, and when
/// the running tick position enters a new beat. Runs of two or more notes
/// become groups. A tuplet whose inner notes are all shorter than a quarter
/// is beamed on its own.
pub fn find_beam_groups(tree: &ScoreTree, measure: NodeId, unit: &TimeUnit) -> Vec<BeamGroup> {
    let quarter = unit.quarter();
    let per_beat = unit.ticks_per_beat.max(1);
    let mut groups = Vec::new();
    let mut run = Run { members: Vec::new(), beat: 0 };
    let mut position: Ticks = 0;

    for child in tree.children(measure) {
        let duration = child.duration.unwrap_or(0);
        match child.kind {
            NodeKind::Note(_) | NodeKind::Chord(_) if duration < quarter && duration > 0 => {
                let beat = position / per_beat;
                if !run.members.is_empty() && beat != run.beat {
                    run.flush(quarter, &mut groups);
                }
                run.members.push((child.id, duration));
                run.beat = beat;
                position += duration;
                if position / per_beat != beat {
                    run.flush(quarter, &mut groups);
                }
            }
            NodeKind::Tuplet(_) => {
                run.flush(quarter, &mut groups);
                let inner: Vec<(NodeId, Ticks)> = tree
                    .children(child.id)
                    .filter(|n| matches!(n.kind, NodeKind::Note(_) | NodeKind::Chord(_)))
                    .map(|n| (n.id, n.duration.unwrap_or(0)))
                    .collect();
                if inner.iter().all(|&(_, d)| d > 0 && d < quarter) {
                    let mut tuplet = Run { members: inner, beat: 0 };
                    tuplet.flush(quarter, &mut groups);
                }
                position += duration;
            }
            _ => {
                run.flush(quarter, &mut groups);
                position += duration;
            }
        }
    }
    run.flush(quarter, &mut groups);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn groups_for(music: &str) -> Vec<(usize, u32)> {
        let out = parse(&format!("X:1\nM:4/4\nL:1/8\nK:C\n{music}|"));
        let tree = &out.tree;
        let measure = tree
            .nodes
            .iter()
            .find(|n| matches!(n.kind, NodeKind::Measure(_)))
            .map(|n| n.id)
            .unwrap();
        let unit = tree.time_unit(measure);
        find_beam_groups(tree, measure, &unit).iter().map(|g| (g.elements.len(), g.beams)).collect()
    }

    #[test]
    fn flag_counts() {
        assert_eq!(flag_count(12, 24), 1);
        assert_eq!(flag_count(6, 24), 2);
        assert_eq!(flag_count(3, 24), 3);
        assert_eq!(flag_count(18, 24), 1);
        assert_eq!(flag_count(24, 24), 0);
    }

    #[test]
    fn eighths_beam_in_pairs_per_beat() {
        assert_eq!(groups_for("CDEF GABc"), vec![(2, 1), (2, 1), (2, 1), (2, 1)]);
    }

    #[test]
    fn sixteenths_fill_one_beat() {
        assert_eq!(groups_for("C/D/E/F/ G2 A2 B2"), vec![(4, 2)]);
    }

    #[test]
    fn rests_and_long_notes_break_runs() {
        assert_eq!(groups_for("C z D2 E/F/G A4"), vec![(3, 2)]);
    }

    #[test]
    fn tuplet_of_short_notes_gets_its_own_beam() {
        assert_eq!(groups_for("(3CDE) F2 G4"), vec![(3, 1)]);
    }
}
