use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::application::{ApplicationStatus, StudentAnswer};
use crate::models::question::{QuestionOption, OPTION_LETTERS};
use serde::Serialize;

/// Per-application counts derived from its answers against the booklet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnswerSummary {
    pub answered: usize,
    pub correct: usize,
    pub wrong: usize,
    pub blank: usize,
    pub status: ApplicationStatus,
}

pub struct GradingService;

impl GradingService {
    /// Letter of the option marked correct; lowest letter wins if the data holds several.
    pub fn correct_letter(options: &[QuestionOption]) -> Option<String> {
        options
            .iter()
            .filter(|o| o.correct)
            .map(|o| o.letter.trim().to_ascii_uppercase())
            .filter(|l| !l.is_empty())
            .min()
    }

    pub fn score(selected: Option<&str>, correct_letter: Option<&str>) -> bool {
        match (selected, correct_letter) {
            (Some(s), Some(c)) => {
                let s = s.trim();
                !s.is_empty() && s.eq_ignore_ascii_case(c.trim())
            }
            _ => false,
        }
    }

    /// Blank or null means "cleared"; anything else must be one of A-E.
    pub fn normalize_selected_option(raw: Option<&str>) -> Result<Option<String>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let letter = raw.trim().to_ascii_uppercase();
        if letter.is_empty() {
            return Ok(None);
        }
        let mut chars = letter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if OPTION_LETTERS.contains(&c) => Ok(Some(letter)),
            _ => Err(Error::invalid(
                "selected_option",
                "selected_option must be A, B, C, D, E or null",
            )),
        }
    }

    pub fn derive_status(
        student_absent: bool,
        finalized: bool,
        answered: usize,
        items_total: usize,
    ) -> ApplicationStatus {
        if student_absent {
            ApplicationStatus::Absent
        } else if finalized || (items_total > 0 && answered >= items_total) {
            ApplicationStatus::Finalized
        } else if answered > 0 {
            ApplicationStatus::Recognized
        } else {
            ApplicationStatus::None
        }
    }

    pub fn is_complete(answered: usize, items_total: usize) -> bool {
        items_total > 0 && answered >= items_total
    }

    /// Counts only answers to `item_ids`, the items of the offer's current booklet.
    pub fn summarize(
        answers: &[StudentAnswer],
        item_ids: &HashSet<i64>,
        student_absent: bool,
        finalized: bool,
    ) -> AnswerSummary {
        let items_total = item_ids.len();
        let mut answered = 0;
        let mut correct = 0;
        for answer in answers {
            if !item_ids.contains(&answer.booklet_item_id) || answer.selected_letter().is_none() {
                continue;
            }
            answered += 1;
            if answer.is_correct {
                correct += 1;
            }
        }

        AnswerSummary {
            answered,
            correct,
            wrong: answered.saturating_sub(correct),
            blank: items_total.saturating_sub(answered),
            status: Self::derive_status(student_absent, finalized, answered, items_total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(letter: &str, correct: bool) -> QuestionOption {
        QuestionOption {
            id: 0,
            question_version_id: 1,
            letter: letter.to_string(),
            option_text: Some(format!("alt {}", letter)),
            option_image: None,
            correct,
        }
    }

    fn answer(item: i64, selected: Option<&str>, is_correct: bool) -> StudentAnswer {
        StudentAnswer {
            id: item,
            application_id: 1,
            booklet_item_id: item,
            selected_option: selected.map(str::to_string),
            is_correct,
        }
    }

    #[test]
    fn correct_letter_picks_the_marked_option() {
        let options = vec![option("A", false), option("B", true), option("C", false)];
        assert_eq!(GradingService::correct_letter(&options).as_deref(), Some("B"));
    }

    #[test]
    fn correct_letter_breaks_ties_by_letter() {
        let options = vec![option("D", true), option("B", true)];
        assert_eq!(GradingService::correct_letter(&options).as_deref(), Some("B"));
    }

    #[test]
    fn unscoreable_version_marks_everything_wrong() {
        let options = vec![option("A", false), option("B", false)];
        let key = GradingService::correct_letter(&options);
        assert!(key.is_none());
        assert!(!GradingService::score(Some("A"), key.as_deref()));
    }

    #[test]
    fn blank_selection_is_never_correct() {
        assert!(!GradingService::score(Some(""), Some("A")));
        assert!(!GradingService::score(None, Some("A")));
        assert!(GradingService::score(Some("A"), Some("A")));
        assert!(!GradingService::score(Some("B"), Some("A")));
    }

    #[test]
    fn normalizes_selected_letters() {
        assert_eq!(GradingService::normalize_selected_option(Some(" c ")).unwrap().as_deref(), Some("C"));
        assert_eq!(GradingService::normalize_selected_option(Some("")).unwrap(), None);
        assert_eq!(GradingService::normalize_selected_option(None).unwrap(), None);
        assert!(GradingService::normalize_selected_option(Some("F")).is_err());
        assert!(GradingService::normalize_selected_option(Some("AB")).is_err());
    }

    #[test]
    fn absence_overrides_finalization() {
        assert_eq!(GradingService::derive_status(true, true, 2, 2), ApplicationStatus::Absent);
        assert_eq!(GradingService::derive_status(false, true, 0, 2), ApplicationStatus::Finalized);
        assert_eq!(GradingService::derive_status(false, false, 2, 2), ApplicationStatus::Finalized);
        assert_eq!(GradingService::derive_status(false, false, 1, 2), ApplicationStatus::Recognized);
        assert_eq!(GradingService::derive_status(false, false, 0, 2), ApplicationStatus::None);
        assert_eq!(GradingService::derive_status(false, false, 0, 0), ApplicationStatus::None);
    }

    #[test]
    fn one_right_one_wrong_is_finalized() {
        let answers = vec![answer(1, Some("A"), true), answer(2, Some("C"), false)];
        let summary = GradingService::summarize(&answers, &HashSet::from([1, 2]), false, false);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.wrong, 1);
        assert_eq!(summary.blank, 0);
        assert_eq!(summary.status, ApplicationStatus::Finalized);
    }

    #[test]
    fn cleared_answers_count_as_blank() {
        let answers = vec![answer(1, Some("A"), true), answer(2, Some(" "), false)];
        let summary = GradingService::summarize(&answers, &HashSet::from([1, 2]), false, false);
        assert_eq!(summary.answered, 1);
        assert_eq!(summary.blank, 1);
        assert_eq!(summary.status, ApplicationStatus::Recognized);
    }

    #[test]
    fn answers_to_other_items_are_not_counted() {
        let answers = vec![answer(1, Some("A"), true), answer(10, Some("B"), true)];
        let summary = GradingService::summarize(&answers, &HashSet::from([1, 2]), false, false);
        assert_eq!(summary.answered, 1);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.blank, 1);
        assert_eq!(summary.status, ApplicationStatus::Recognized);
    }
}
