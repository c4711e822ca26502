use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::dto::report_dto::{
    AccuracyBucket, ClassRollupRow, DistributionBucket, ItemReportRow, OfferFinalization,
    OfferReport, OverviewReport, RecentOffer, ReportQuery, ReportScope, ReportTotals,
    StudentReportRow,
};
use crate::error::{Error, Result};
use crate::middleware::auth::Principal;
use crate::models::application::{Application, ApplicationStatus, StudentAnswer};
use crate::models::booklet::BookletItemView;
use crate::models::offer::{Offer, OfferStatus};
use crate::models::question::OPTION_LETTERS;
use crate::services::booklet_service::load_item_views;
use crate::services::grading_service::GradingService;
use crate::services::roster_service::{self, RosterProvider};
use crate::utils::math::{pct, round2};
use crate::utils::time;

const BUCKET_LABELS: [&str; 4] = ["0-25", "25-50", "50-75", "75-100"];
const TOP_OFFERS: usize = 5;
const RECENT_OFFERS: usize = 5;

/// An application together with every answer row it owns. Counts only consider
/// answers to the items passed in; rows left over from another booklet are ignored.
#[derive(Debug, Clone)]
pub struct ApplicationAnswers {
    pub application: Application,
    pub answers: Vec<StudentAnswer>,
}

impl ApplicationAnswers {
    fn selected<'a>(
        &'a self,
        items: &'a HashSet<i64>,
    ) -> impl Iterator<Item = (&'a StudentAnswer, String)> + 'a {
        self.answers
            .iter()
            .filter(|a| items.contains(&a.booklet_item_id))
            .filter_map(|a| a.selected_letter().map(|letter| (a, letter)))
    }

    fn answered(&self, items: &HashSet<i64>) -> usize {
        self.selected(items).count()
    }

    fn correct(&self, items: &HashSet<i64>) -> usize {
        self.selected(items).filter(|(a, _)| a.is_correct).count()
    }

    fn status(&self, items: &HashSet<i64>) -> ApplicationStatus {
        GradingService::derive_status(
            self.application.student_absent,
            self.application.finalized_at.is_some(),
            self.answered(items),
            items.len(),
        )
    }
}

/// An offer in the overview, with the data the overview needs about its booklet.
#[derive(Debug, Clone)]
pub struct OverviewOffer {
    pub offer: Offer,
    pub booklet_name: String,
    pub item_ids: HashSet<i64>,
}

/// Index into `BUCKET_LABELS`: `[0,25]`, `(25,50]`, `(50,75]`, `(75,100]`.
fn bucket_index(correct_pct: f64) -> usize {
    if correct_pct <= 25.0 {
        0
    } else if correct_pct <= 50.0 {
        1
    } else if correct_pct <= 75.0 {
        2
    } else {
        3
    }
}

fn accuracy_buckets(counts: [usize; 4], considered: usize) -> Vec<AccuracyBucket> {
    let denominator = considered.max(1);
    BUCKET_LABELS
        .iter()
        .zip(counts)
        .map(|(label, count)| AccuracyBucket {
            range: label.to_string(),
            count_students: count,
            pct_students: pct(count, denominator),
        })
        .collect()
}

#[derive(Default)]
struct ItemTally {
    answered: usize,
    correct: usize,
    wrong: usize,
    option_counts: BTreeMap<String, usize>,
}

impl ItemTally {
    fn new() -> Self {
        Self {
            option_counts: OPTION_LETTERS.iter().map(|l| (l.to_string(), 0)).collect(),
            ..Default::default()
        }
    }

    /// First letter in A-E order holding the strictly highest count.
    fn most_marked(&self) -> Option<String> {
        let mut best: Option<(&String, usize)> = None;
        for (letter, &count) in &self.option_counts {
            if count > best.map_or(0, |(_, c)| c) {
                best = Some((letter, count));
            }
        }
        best.map(|(letter, _)| letter.clone())
    }
}

/// Per-student rows, per-item statistics and histograms for one offer.
///
/// Absent students count towards `students_total` and `absent_count` only; every
/// other denominator uses the present students.
pub fn build_offer_report(
    offer_id: i64,
    items: &[BookletItemView],
    applications: &[ApplicationAnswers],
    student_names: &HashMap<(i64, i64), String>,
) -> OfferReport {
    let items_total = items.len();
    let item_ids: HashSet<i64> = items.iter().map(|i| i.id).collect();
    let mut tallies: HashMap<i64, ItemTally> = items.iter().map(|i| (i.id, ItemTally::new())).collect();

    let mut students = Vec::with_capacity(applications.len());
    let mut distribution = vec![0usize; items_total + 1];
    let mut buckets = [0usize; 4];
    let mut absent_count = 0;
    let mut finalized_count = 0;
    let mut in_progress_count = 0;
    let mut present_count: usize = 0;
    let mut correct_sum: usize = 0;

    for entry in applications {
        let application = &entry.application;
        let answered = entry.answered(&item_ids);
        let correct = entry.correct(&item_ids);
        let status = entry.status(&item_ids);
        let correct_pct = pct(correct, items_total);

        match status {
            ApplicationStatus::Absent => absent_count += 1,
            ApplicationStatus::Finalized => finalized_count += 1,
            ApplicationStatus::Recognized => in_progress_count += 1,
            ApplicationStatus::None => {}
        }

        if status != ApplicationStatus::Absent {
            present_count += 1;
            correct_sum += correct;
            distribution[correct.min(items_total)] += 1;
            buckets[bucket_index(correct_pct)] += 1;

            for (answer, letter) in entry.selected(&item_ids) {
                let Some(tally) = tallies.get_mut(&answer.booklet_item_id) else {
                    continue;
                };
                tally.answered += 1;
                if answer.is_correct {
                    tally.correct += 1;
                } else {
                    tally.wrong += 1;
                }
                if let Some(count) = tally.option_counts.get_mut(&letter) {
                    *count += 1;
                }
            }
        }

        students.push(StudentReportRow {
            application_id: application.id,
            student_ref: application.student_ref,
            name: roster_service::student_display_name(
                student_names,
                application.class_ref,
                application.student_ref,
            ),
            class_ref: application.class_ref,
            correct,
            wrong: answered.saturating_sub(correct),
            blank: items_total.saturating_sub(answered),
            total: items_total,
            correct_pct,
            status,
        });
    }

    students.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then(a.student_ref.cmp(&b.student_ref))
    });

    let item_rows = items
        .iter()
        .map(|item| {
            let tally = tallies.remove(&item.id).unwrap_or_else(ItemTally::new);
            let blank_count = present_count.saturating_sub(tally.answered);
            ItemReportRow {
                booklet_item_id: item.id,
                order: item.order,
                question_id: item.question_id,
                question_version_id: item.question_version_id,
                version_number: item.version_number,
                subject_name: item.subject_name.clone(),
                annulled: item.annulled,
                total_answered: tally.answered,
                correct_count: tally.correct,
                wrong_count: tally.wrong,
                blank_count,
                correct_pct: pct(tally.correct, present_count),
                wrong_pct: pct(tally.wrong, present_count),
                blank_pct: pct(blank_count, present_count),
                most_marked_option: tally.most_marked(),
                option_counts: tally.option_counts,
            }
        })
        .collect();

    let avg_correct = if present_count > 0 {
        correct_sum as f64 / present_count as f64
    } else {
        0.0
    };
    let avg_correct_pct = if items_total > 0 && present_count > 0 {
        avg_correct / items_total as f64 * 100.0
    } else {
        0.0
    };

    OfferReport {
        offer_id,
        items_total,
        students_total: applications.len(),
        present_count,
        absent_count,
        finalized_count,
        in_progress_count,
        avg_correct: round2(avg_correct),
        avg_correct_pct: round2(avg_correct_pct),
        totals: ReportTotals {
            students_total: applications.len(),
            absent: absent_count,
            finalized: finalized_count,
            in_progress: in_progress_count,
        },
        accuracy_buckets: accuracy_buckets(buckets, present_count),
        distribution: distribution
            .into_iter()
            .enumerate()
            .map(|(correct, count)| DistributionBucket { correct, count })
            .collect(),
        students,
        items: item_rows,
    }
}

/// Per-class accuracy and absence, ordered by class ref. A student counts as
/// absent here when they have no non-blank answer.
pub fn class_rollup(
    item_ids: &HashSet<i64>,
    applications: &[ApplicationAnswers],
    class_names: &HashMap<i64, String>,
) -> Vec<ClassRollupRow> {
    #[derive(Default)]
    struct ClassTally {
        students: usize,
        correct: usize,
        absent: usize,
    }

    let mut grouped: BTreeMap<i64, ClassTally> = BTreeMap::new();
    for entry in applications {
        let tally = grouped.entry(entry.application.class_ref).or_default();
        tally.students += 1;
        if entry.answered(item_ids) == 0 {
            tally.absent += 1;
        }
        tally.correct += entry.correct(item_ids);
    }

    grouped
        .into_iter()
        .map(|(class_id, tally)| ClassRollupRow {
            class_id,
            class_name: roster_service::class_display_name(class_names, class_id),
            total_students: tally.students,
            accuracy_percent: pct(tally.correct, tally.students * item_ids.len()),
            absent_count: tally.absent,
            absent_percent: pct(tally.absent, tally.students),
        })
        .collect()
}

/// Platform-wide counters across `offers` and their applications.
///
/// `finalized_total` counts an application with a stored finalization or a
/// complete answer set, absent or not. The per-offer ranking counts stored
/// finalizations only.
pub fn overview(
    today: NaiveDate,
    offers: &[OverviewOffer],
    applications: &[ApplicationAnswers],
) -> OverviewReport {
    let by_id: HashMap<i64, &OverviewOffer> = offers.iter().map(|o| (o.offer.id, o)).collect();

    let offers_active = offers
        .iter()
        .filter(|o| o.offer.status(today) == OfferStatus::Open)
        .count();
    let offers_closed = offers
        .iter()
        .filter(|o| o.offer.status(today) == OfferStatus::Closed)
        .count();

    let no_items = HashSet::new();
    let mut answered_total = 0;
    let mut finalized_total = 0;
    let mut absent_total = 0;
    let mut per_offer: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
    let mut buckets = [0usize; 4];
    let mut considered = 0;

    for entry in applications {
        let item_ids = by_id
            .get(&entry.application.offer_id)
            .map_or(&no_items, |o| &o.item_ids);
        let items_total = item_ids.len();
        let answered = entry.answered(item_ids);
        let stored = entry.application.finalized_at.is_some();

        if answered > 0 {
            answered_total += 1;
        }
        if entry.application.student_absent {
            absent_total += 1;
        }
        if stored || GradingService::is_complete(answered, items_total) {
            finalized_total += 1;
        }
        let counts = per_offer.entry(entry.application.offer_id).or_default();
        counts.0 += 1;
        if stored {
            counts.1 += 1;
        }

        if items_total == 0 || entry.application.student_absent || answered == 0 {
            continue;
        }
        considered += 1;
        buckets[bucket_index(entry.correct(item_ids) as f64 / items_total as f64 * 100.0)] += 1;
    }

    let mut top_offers: Vec<OfferFinalization> = per_offer
        .into_iter()
        .map(|(offer_id, (total, finalized))| OfferFinalization {
            offer_id,
            label: by_id
                .get(&offer_id)
                .map(|o| o.offer.label())
                .unwrap_or_else(|| format!("Oferta #{}", offer_id)),
            finalized_pct: pct(finalized, total),
        })
        .collect();
    top_offers.sort_by(|a, b| {
        b.finalized_pct
            .total_cmp(&a.finalized_pct)
            .then(b.offer_id.cmp(&a.offer_id))
    });
    top_offers.truncate(TOP_OFFERS);

    let mut recent: Vec<&OverviewOffer> = offers.iter().collect();
    recent.sort_by(|a, b| {
        b.offer
            .created_at
            .cmp(&a.offer.created_at)
            .then(b.offer.id.cmp(&a.offer.id))
    });
    let recent_offers = recent
        .into_iter()
        .take(RECENT_OFFERS)
        .map(|o| RecentOffer {
            offer_id: o.offer.id,
            label: o.offer.label(),
            booklet_name: o.booklet_name.clone(),
            start_date: o.offer.start_date,
            end_date: o.offer.end_date,
            created_at: o.offer.created_at,
        })
        .collect();

    OverviewReport {
        offers_active,
        offers_closed,
        offers_total: offers.len(),
        applications_total: applications.len(),
        answered_total,
        finalized_total,
        absent_total,
        finalization_rate_pct: pct(finalized_total, applications.len()),
        top_offers_finalization: top_offers,
        accuracy_buckets_overall: accuracy_buckets(buckets, considered),
        recent_offers,
    }
}

/// Class refs a scope restricts to, or `None` for every class. Roster failures
/// surface as errors since the result would otherwise be silently wrong.
pub async fn resolve_scope(
    roster: &dyn RosterProvider,
    principal: &Principal,
    scope: ReportScope,
) -> Result<Option<Vec<i64>>> {
    match scope {
        ReportScope::All => Ok(None),
        ReportScope::Class(class_ref) => Ok(Some(vec![class_ref])),
        ReportScope::Roster { school_ref, serie } => {
            let refs: HashSet<i64> =
                roster_service::resolve_class_refs(roster, principal, school_ref, serie)
                    .await
                    .map_err(|e| match e {
                        Error::Roster(_) => e,
                        other => Error::Roster(other.to_string()),
                    })?;
            let mut refs: Vec<i64> = refs.into_iter().collect();
            refs.sort_unstable();
            Ok(Some(refs))
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OverviewOfferRow {
    #[sqlx(flatten)]
    offer: Offer,
    booklet_name: String,
    item_ids: Vec<i64>,
}

#[derive(Clone)]
pub struct ReportService {
    pool: PgPool,
    roster: Arc<dyn RosterProvider>,
}

impl ReportService {
    pub fn new(pool: PgPool, roster: Arc<dyn RosterProvider>) -> Self {
        Self { pool, roster }
    }

    pub async fn offer_report(
        &self,
        principal: &Principal,
        offer_id: i64,
        query: &ReportQuery,
    ) -> Result<OfferReport> {
        let scope = query.scope()?;
        let offer = self.owned_offer(principal, offer_id).await?;
        let class_refs = resolve_scope(self.roster.as_ref(), principal, scope).await?;

        let items = load_item_views(&self.pool, offer.booklet_id).await?;
        let applications = self.load_applications(&[offer.id], class_refs).await?;

        let mut classes: Vec<i64> = applications.iter().map(|a| a.application.class_ref).collect();
        classes.sort_unstable();
        classes.dedup();
        let names = roster_service::student_names(self.roster.as_ref(), principal, classes).await;

        Ok(build_offer_report(offer.id, &items, &applications, &names))
    }

    pub async fn class_report(
        &self,
        principal: &Principal,
        offer_id: i64,
        query: &ReportQuery,
    ) -> Result<Vec<ClassRollupRow>> {
        let scope = query.roster_scope()?;
        let offer = self.owned_offer(principal, offer_id).await?;
        let class_refs = resolve_scope(self.roster.as_ref(), principal, scope).await?;

        let item_ids: HashSet<i64> = load_item_views(&self.pool, offer.booklet_id)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        let applications = self.load_applications(&[offer.id], class_refs).await?;
        let names = roster_service::class_names(self.roster.as_ref(), principal).await;

        Ok(class_rollup(&item_ids, &applications, &names))
    }

    pub async fn overview(&self, principal: &Principal) -> Result<OverviewReport> {
        let rows = sqlx::query_as::<_, OverviewOfferRow>(
            r#"
            SELECT o.*, b.name AS booklet_name,
                   ARRAY(SELECT bi.id FROM booklet_items bi WHERE bi.booklet_id = o.booklet_id) AS item_ids
            FROM offers o
            JOIN booklets b ON b.id = o.booklet_id
            WHERE o.deleted = FALSE AND ($1 OR o.created_by = $2)
            ORDER BY o.created_at DESC, o.id DESC
            "#,
        )
        .bind(principal.is_superuser)
        .bind(principal.user_id)
        .fetch_all(&self.pool)
        .await?;

        let offers: Vec<OverviewOffer> = rows
            .into_iter()
            .map(|row| OverviewOffer {
                offer: row.offer,
                booklet_name: row.booklet_name,
                item_ids: row.item_ids.into_iter().collect(),
            })
            .collect();
        let offer_ids: Vec<i64> = offers.iter().map(|o| o.offer.id).collect();
        let applications = self.load_applications(&offer_ids, None).await?;

        Ok(overview(time::today(), &offers, &applications))
    }

    async fn owned_offer(&self, principal: &Principal, offer_id: i64) -> Result<Offer> {
        let offer = sqlx::query_as::<_, Offer>(
            "SELECT * FROM offers WHERE id = $1 AND deleted = FALSE",
        )
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Offer not found".to_string()))?;
        principal.ensure_owner(offer.created_by, "You can only see reports of offers you created")?;
        Ok(offer)
    }

    async fn load_applications(
        &self,
        offer_ids: &[i64],
        class_refs: Option<Vec<i64>>,
    ) -> Result<Vec<ApplicationAnswers>> {
        let applications = sqlx::query_as::<_, Application>(
            r#"SELECT * FROM applications
               WHERE offer_id = ANY($1)
                 AND ($2::bigint[] IS NULL OR class_ref = ANY($2))
               ORDER BY class_ref, student_ref, id"#,
        )
        .bind(offer_ids)
        .bind(class_refs)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = applications.iter().map(|a| a.id).collect();
        let answers = sqlx::query_as::<_, StudentAnswer>(
            "SELECT * FROM student_answers WHERE application_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_application: HashMap<i64, Vec<StudentAnswer>> = HashMap::new();
        for answer in answers {
            by_application.entry(answer.application_id).or_default().push(answer);
        }
        Ok(applications
            .into_iter()
            .map(|application| {
                let answers = by_application.remove(&application.id).unwrap_or_default();
                ApplicationAnswers {
                    application,
                    answers,
                }
            })
            .collect())
    }
}
