use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// The three per-day completion toggles. `verse_text` is the base task;
/// the other two cannot be true without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSet {
    pub verse_text: bool,
    #[serde(default)]
    pub footnotes: bool,
    #[serde(default)]
    pub partner: bool,
}

impl TaskSet {
    pub fn default_config() -> Self {
        TaskSet {
            verse_text: true,
            footnotes: false,
            partner: false,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.verse_text || self.footnotes || self.partner
    }

    /// Verse text is the only task that gates overall completion.
    pub fn overall_completed(&self) -> bool {
        self.verse_text
    }

    pub fn points(&self) -> i64 {
        self.verse_text as i64 + self.footnotes as i64 + self.partner as i64
    }
}

/// How a mark-day request expressed completion. Older clients send a single
/// boolean; newer ones send the task map. Normalized once at the boundary.
#[derive(Debug, Clone, Copy)]
pub enum CompletionInput {
    Legacy(bool),
    Tasks(TaskSet),
}

impl CompletionInput {
    pub fn normalize(self) -> TaskSet {
        let raw = match self {
            CompletionInput::Legacy(done) => TaskSet {
                verse_text: done,
                footnotes: false,
                partner: false,
            },
            CompletionInput::Tasks(t) => t,
        };
        if raw.verse_text {
            raw
        } else {
            // Footnotes/partner cannot be done without the base text read.
            TaskSet {
                verse_text: false,
                footnotes: false,
                partner: false,
            }
        }
    }
}

/// Points for one stored progress record. Records written before task
/// tracking existed carry no task map; a completed one scores exactly 1.
pub fn record_points(tasks: Option<TaskSet>, is_completed: bool) -> i64 {
    match tasks {
        Some(t) => t.points(),
        None => {
            if is_completed {
                1
            } else {
                0
            }
        }
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Inclusive end date: a 1-day schedule ends on its start date.
pub fn end_date(start: NaiveDate, duration_days: i64) -> NaiveDate {
    start + Duration::days(duration_days - 1)
}

pub fn scheduled_date(start: NaiveDate, day_number: i64) -> NaiveDate {
    start + Duration::days(day_number - 1)
}

pub fn day_of_week(d: NaiveDate) -> String {
    d.format("%A").to_string()
}

/// Wall-clock current day, always within [1, duration_days]. Dates before
/// the start clamp to 1, dates past the end clamp to the last day.
pub fn current_day(start: NaiveDate, today: NaiveDate, duration_days: i64) -> i64 {
    let elapsed = (today - start).num_days() + 1;
    elapsed.clamp(1, duration_days.max(1))
}

pub fn completion_percentage(completed: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (100.0 * completed as f64 / total as f64).round() as i64
}

/// URL-friendly group id derived from the group name: lowercase,
/// non-alphanumerics stripped, whitespace runs collapsed to hyphens,
/// truncated to 50 chars.
pub fn group_slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let mut slug = String::new();
    for word in cleaned.split_whitespace() {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(word);
    }
    slug.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).expect("date")
    }

    #[test]
    fn legacy_boolean_translates_to_verse_text_only() {
        let tasks = CompletionInput::Legacy(true).normalize();
        assert_eq!(
            tasks,
            TaskSet {
                verse_text: true,
                footnotes: false,
                partner: false
            }
        );
        assert!(tasks.overall_completed());
        assert_eq!(tasks.points(), 1);

        let cleared = CompletionInput::Legacy(false).normalize();
        assert!(!cleared.overall_completed());
        assert_eq!(cleared.points(), 0);
    }

    #[test]
    fn verse_text_false_forces_other_tasks_false() {
        let tasks = CompletionInput::Tasks(TaskSet {
            verse_text: false,
            footnotes: true,
            partner: true,
        })
        .normalize();
        assert_eq!(
            tasks,
            TaskSet {
                verse_text: false,
                footnotes: false,
                partner: false
            }
        );
        assert_eq!(tasks.points(), 0);
    }

    #[test]
    fn full_task_set_scores_three_points() {
        let tasks = CompletionInput::Tasks(TaskSet {
            verse_text: true,
            footnotes: true,
            partner: true,
        })
        .normalize();
        assert_eq!(tasks.points(), 3);
    }

    #[test]
    fn records_without_task_map_score_one_when_completed() {
        assert_eq!(record_points(None, true), 1);
        assert_eq!(record_points(None, false), 0);
        assert_eq!(
            record_points(
                Some(TaskSet {
                    verse_text: true,
                    footnotes: true,
                    partner: false
                }),
                true
            ),
            2
        );
    }

    #[test]
    fn end_date_is_inclusive() {
        assert_eq!(end_date(date("2024-01-01"), 10), date("2024-01-10"));
        assert_eq!(end_date(date("2024-01-01"), 1), date("2024-01-01"));
        // Across a leap day.
        assert_eq!(end_date(date("2024-02-28"), 3), date("2024-03-01"));
    }

    #[test]
    fn current_day_clamps_to_schedule_bounds() {
        let start = date("2024-01-10");
        assert_eq!(current_day(start, date("2024-01-01"), 30), 1);
        assert_eq!(current_day(start, date("2024-01-10"), 30), 1);
        assert_eq!(current_day(start, date("2024-01-11"), 30), 2);
        assert_eq!(current_day(start, date("2024-02-20"), 30), 30);
    }

    #[test]
    fn late_joiner_lands_mid_schedule() {
        let start = date("2024-01-01");
        assert_eq!(current_day(start, date("2024-01-11"), 100), 11);
    }

    #[test]
    fn completion_percentage_rounds_and_handles_empty() {
        assert_eq!(completion_percentage(0, 0), 0);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 67);
        assert_eq!(completion_percentage(10, 10), 100);
    }

    #[test]
    fn group_slug_strips_and_hyphenates() {
        assert_eq!(group_slug("Morning Watch 2024!"), "morning-watch-2024");
        assert_eq!(group_slug("  Psalms &   Proverbs  "), "psalms-proverbs");
        let long = "a".repeat(80);
        assert_eq!(group_slug(&long).len(), 50);
    }

    #[test]
    fn day_of_week_uses_full_names() {
        assert_eq!(day_of_week(date("2024-01-01")), "Monday");
        assert_eq!(day_of_week(date("2024-01-07")), "Sunday");
    }
}
