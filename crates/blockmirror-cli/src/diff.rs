use blockmirror_engine::Cmd;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Keep,
    Delete,
    Insert,
}

/// Commands that turn `old` into `new` line by line.
///
/// Replays an edit made outside the engine the way an editor would have made
/// it: changed lines are rewritten in place so their blocks keep their
/// anchors, and only surplus lines are inserted or deleted. Commands are
/// ordered bottom-up so each one's line numbers refer to the original text.
pub fn line_commands(old: &[String], new: &[String]) -> Vec<Cmd> {
    let steps = align(old, new);

    let mut hunks = Vec::new();
    let (mut i, mut j, mut k) = (0, 0, 0);
    while k < steps.len() {
        if steps[k] == Step::Keep {
            i += 1;
            j += 1;
            k += 1;
            continue;
        }
        let (start_old, start_new) = (i, j);
        while k < steps.len() && steps[k] != Step::Keep {
            match steps[k] {
                Step::Delete => i += 1,
                Step::Insert => j += 1,
                Step::Keep => {}
            }
            k += 1;
        }
        hunks.push((start_old..i, start_new..j));
    }

    let mut cmds = Vec::new();
    for (removed, added) in hunks.into_iter().rev() {
        let paired = removed.len().min(added.len());
        let extra_old = removed.start + paired..removed.end;
        let extra_new = added.start + paired..added.end;
        if !extra_old.is_empty() {
            cmds.push(Cmd::DeleteLines { lines: extra_old });
        } else if !extra_new.is_empty() {
            cmds.push(Cmd::InsertLines {
                before: removed.start + paired,
                lines: new[extra_new].to_vec(),
            });
        }
        for offset in (0..paired).rev() {
            cmds.push(Cmd::ReplaceLine {
                line: removed.start + offset,
                text: new[added.start + offset].clone(),
            });
        }
    }
    cmds
}

/// Longest-common-subsequence alignment of two line lists
fn align(old: &[String], new: &[String]) -> Vec<Step> {
    let (n, m) = (old.len(), new.len());
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut steps = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            steps.push(Step::Keep);
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            steps.push(Step::Delete);
            i += 1;
        } else {
            steps.push(Step::Insert);
            j += 1;
        }
    }
    steps.extend(std::iter::repeat_n(Step::Delete, n - i));
    steps.extend(std::iter::repeat_n(Step::Insert, m - j));
    steps
}
