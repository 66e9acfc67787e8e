//! Statistics aggregation
//!
//! Reads reference rows from the relational store, batch-fetches their
//! content from the document store and rolls both up in memory. Nothing is
//! cached; every request recomputes from the stores.
//!
//! The analysed set is shared by every dimension: references matching the
//! relational filters, never `deleted`, with live content matching the
//! optional type filter.

use crate::achievements::{competition_level, UNKNOWN_LEVEL};
use crate::achievements::{Achievement, AchievementRepository};
use crate::auth::{perms, roles, AuthContext};
use crate::db::models::{AchievementStatus, AchievementType, Student, User};
use crate::errors::{AppError, Result};
use crate::metrics::record_statistics;
use crate::store::{ReferenceFilter, RelationalStore};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const DEFAULT_TOP_LIMIT: usize = 10;
pub const MAX_TOP_LIMIT: usize = 100;

// ============================================================================
// Request
// ============================================================================

/// Raw query string of `GET /reports/statistics`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatisticsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub achievement_type: Option<String>,
    pub status: Option<String>,
    pub period: Option<String>,
    pub top_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodGranularity {
    #[default]
    Monthly,
    Yearly,
}

/// Validated statistics request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsFilter {
    pub start_date: Option<NaiveDate>,
    /// Inclusive
    pub end_date: Option<NaiveDate>,
    pub achievement_type: Option<AchievementType>,
    pub status: Option<AchievementStatus>,
    pub period: PeriodGranularity,
    pub top_limit: usize,
}

impl StatisticsQuery {
    pub fn parse(&self) -> Result<StatisticsFilter> {
        let start_date = parse_date(self.start_date.as_deref(), "start_date")?;
        let end_date = parse_date(self.end_date.as_deref(), "end_date")?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(AppError::validation(
                    "end_date",
                    "end_date must not be before start_date",
                ));
            }
        }

        let period = match self.period.as_deref().map(str::trim) {
            None | Some("") | Some("monthly") => PeriodGranularity::Monthly,
            Some("yearly") => PeriodGranularity::Yearly,
            Some(other) => {
                return Err(AppError::validation(
                    "period",
                    format!("period must be 'monthly' or 'yearly' (got '{}')", other),
                ))
            }
        };

        let top_limit = self.top_limit.unwrap_or(DEFAULT_TOP_LIMIT);
        if !(1..=MAX_TOP_LIMIT).contains(&top_limit) {
            return Err(AppError::validation(
                "top_limit",
                format!("top_limit must be between 1 and {}", MAX_TOP_LIMIT),
            ));
        }

        Ok(StatisticsFilter {
            start_date,
            end_date,
            achievement_type: crate::achievements::parse_optional(
                self.achievement_type.as_deref(),
                "achievement_type",
            )?,
            status: crate::achievements::parse_optional(self.status.as_deref(), "status")?,
            period,
            top_limit,
        })
    }
}

fn parse_date(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::validation(field, format!("{} must be YYYY-MM-DD", field))),
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::default()).and_utc()
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeStatistic {
    pub achievement_type: AchievementType,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodStatistic {
    /// `YYYY-MM` or `YYYY`
    pub period: String,
    pub count: u64,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopStudent {
    pub student_id: Uuid,
    pub student_number: String,
    pub full_name: String,
    pub program_study: String,
    pub academic_year: String,
    pub total_count: u64,
    pub verified_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStatistic {
    pub level: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticSummary {
    pub total_achievements: u64,
    pub verified_achievements: u64,
    /// Submitted and awaiting review
    pub pending_achievements: u64,
    pub rejected_achievements: u64,
    pub total_students: u64,
    /// Observed `created_at` range, absent for an empty set
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub total_by_type: Vec<TypeStatistic>,
    pub total_by_period: Vec<PeriodStatistic>,
    pub top_students: Vec<TopStudent>,
    pub competition_levels: Vec<LevelStatistic>,
    pub summary: StatisticSummary,
}

// ============================================================================
// Service
// ============================================================================

/// Which students a caller may aggregate over
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    All,
    Students(Vec<Uuid>),
}

impl Scope {
    fn label(&self) -> &'static str {
        match self {
            Scope::All => "all",
            Scope::Students(_) => "students",
        }
    }
}

#[derive(Clone)]
pub struct StatisticsService {
    repo: AchievementRepository,
    directory: Arc<dyn RelationalStore>,
}

impl StatisticsService {
    pub fn new(repo: AchievementRepository, directory: Arc<dyn RelationalStore>) -> Self {
        Self { repo, directory }
    }

    pub async fn report(
        &self,
        auth: &AuthContext,
        query: &StatisticsQuery,
    ) -> Result<StatisticsReport> {
        let filter = query.parse()?;

        auth.require_permission(perms::STATISTICS, perms::READ)?;
        let scope = self.scope(auth).await?;

        let started = Instant::now();
        let label = scope.label();

        let student_ids = match scope {
            Scope::All => None,
            Scope::Students(ids) if ids.is_empty() => {
                record_statistics(started.elapsed().as_secs_f64(), label, 0);
                return Ok(StatisticsReport::default());
            }
            Scope::Students(ids) => Some(ids),
        };

        let references = ReferenceFilter {
            student_ids,
            status: filter.status,
            exclude_deleted: true,
            created_from: filter.start_date.map(day_start),
            created_before: filter
                .end_date
                .map(|end| day_start(end) + Duration::days(1)),
        };

        let achievements = self.repo.list(&references).await?;
        let analysed: Vec<Achievement> = achievements
            .into_iter()
            .filter(|a| a.status != AchievementStatus::Deleted)
            .filter(|a| {
                filter
                    .achievement_type
                    .map_or(true, |kind| a.achievement_type == kind)
            })
            .collect();

        let profiles = self.profiles(&analysed).await?;
        let report = aggregate(&analysed, &profiles, filter.period, filter.top_limit);

        record_statistics(started.elapsed().as_secs_f64(), label, analysed.len());
        Ok(report)
    }

    async fn scope(&self, auth: &AuthContext) -> Result<Scope> {
        if auth.has_permission(perms::STATISTICS, perms::READ_ALL) {
            return Ok(Scope::All);
        }

        if auth.has_role(roles::LECTURER) {
            let lecturer = self
                .directory
                .find_lecturer_by_user(auth.user_id)
                .await?
                .ok_or_else(|| AppError::forbidden("caller has no lecturer profile"))?;
            let advisees = self.directory.list_students_by_advisor(lecturer.id).await?;
            return Ok(Scope::Students(advisees.into_iter().map(|s| s.id).collect()));
        }

        match self.directory.find_student_by_user(auth.user_id).await? {
            Some(student) => Ok(Scope::Students(vec![student.id])),
            None => Err(AppError::forbidden("no statistics scope for this account")),
        }
    }

    async fn profiles(&self, analysed: &[Achievement]) -> Result<HashMap<Uuid, (Student, Option<User>)>> {
        let ids: Vec<Uuid> = analysed
            .iter()
            .map(|a| a.student_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let students = self.directory.find_students_by_ids(&ids).await?;
        let user_ids: Vec<Uuid> = students.iter().map(|s| s.user_id).collect();
        let mut users: HashMap<Uuid, User> = self
            .directory
            .find_users_by_ids(&user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        Ok(students
            .into_iter()
            .map(|s| {
                let user = users.remove(&s.user_id);
                (s.id, (s, user))
            })
            .collect())
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Roll up an analysed set; pure so it can be tested without stores
fn aggregate(
    analysed: &[Achievement],
    profiles: &HashMap<Uuid, (Student, Option<User>)>,
    period: PeriodGranularity,
    top_limit: usize,
) -> StatisticsReport {
    let total = analysed.len() as u64;

    let mut by_type: HashMap<AchievementType, u64> = HashMap::new();
    let mut by_period: BTreeMap<(i32, Option<u32>), u64> = BTreeMap::new();
    let mut by_level: HashMap<String, u64> = HashMap::new();
    let mut by_student: HashMap<Uuid, (u64, u64)> = HashMap::new();
    let mut summary = StatisticSummary {
        total_achievements: total,
        ..Default::default()
    };

    for a in analysed {
        *by_type.entry(a.achievement_type).or_default() += 1;

        let key = match period {
            PeriodGranularity::Monthly => (a.created_at.year(), Some(a.created_at.month())),
            PeriodGranularity::Yearly => (a.created_at.year(), None),
        };
        *by_period.entry(key).or_default() += 1;

        let level = competition_level(a.achievement_type, &a.details)
            .unwrap_or_else(|| UNKNOWN_LEVEL.to_string());
        *by_level.entry(level).or_default() += 1;

        let verified = a.status == AchievementStatus::Verified;
        let entry = by_student.entry(a.student_id).or_default();
        entry.0 += 1;
        entry.1 += u64::from(verified);

        match a.status {
            AchievementStatus::Verified => summary.verified_achievements += 1,
            AchievementStatus::Submitted => summary.pending_achievements += 1,
            AchievementStatus::Rejected => summary.rejected_achievements += 1,
            _ => {}
        }

        summary.date_range = Some(match summary.date_range.take() {
            None => DateRange {
                start_date: a.created_at,
                end_date: a.created_at,
            },
            Some(range) => DateRange {
                start_date: range.start_date.min(a.created_at),
                end_date: range.end_date.max(a.created_at),
            },
        });
    }
    summary.total_students = by_student.len() as u64;

    let mut total_by_type: Vec<TypeStatistic> = by_type
        .into_iter()
        .map(|(achievement_type, count)| TypeStatistic {
            achievement_type,
            count,
            percentage: percentage(count, total),
        })
        .collect();
    total_by_type.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.achievement_type.as_str().cmp(b.achievement_type.as_str()))
    });

    let total_by_period = by_period
        .into_iter()
        .map(|((year, month), count)| PeriodStatistic {
            period: match month {
                Some(m) => format!("{:04}-{:02}", year, m),
                None => format!("{:04}", year),
            },
            count,
            year,
            month,
        })
        .collect();

    let mut competition_levels: Vec<LevelStatistic> = by_level
        .into_iter()
        .map(|(level, count)| LevelStatistic {
            level,
            count,
            percentage: percentage(count, total),
        })
        .collect();
    competition_levels.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.level.cmp(&b.level)));

    let mut top_students: Vec<TopStudent> = by_student
        .into_iter()
        .filter_map(|(student_id, (total_count, verified_count))| {
            let (student, user) = profiles.get(&student_id)?;
            Some(TopStudent {
                student_id,
                student_number: student.student_number.clone(),
                full_name: user.as_ref().map(|u| u.full_name.clone()).unwrap_or_default(),
                program_study: student.program_study.clone(),
                academic_year: student.academic_year.clone(),
                total_count,
                verified_count,
            })
        })
        .collect();
    top_students.sort_by(|a, b| {
        b.total_count
            .cmp(&a.total_count)
            .then_with(|| b.verified_count.cmp(&a.verified_count))
            .then_with(|| a.student_number.cmp(&b.student_number))
    });
    top_students.truncate(top_limit);

    StatisticsReport {
        total_by_type,
        total_by_period,
        top_students,
        competition_levels,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::{AchievementDetails, NewAchievement};
    use crate::auth::PermissionClaim;
    use crate::store::memory::{MemoryContentStore, MemoryRelationalStore};
    use crate::store::{DirectoryStore, NewLecturer, NewStudent, NewUser};
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryRelationalStore>,
        repo: AchievementRepository,
        service: StatisticsService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRelationalStore::seeded());
        let repo = AchievementRepository::new(Arc::new(MemoryContentStore::new()), store.clone());
        Fixture {
            service: StatisticsService::new(repo.clone(), store.clone()),
            store,
            repo,
        }
    }

    async fn account(store: &MemoryRelationalStore, role: &str, username: &str) -> AuthContext {
        let role = store.find_role_by_name(role).await.unwrap().unwrap();
        let user = store
            .create_user(NewUser {
                username: username.into(),
                email: format!("{}@campus.test", username),
                password_hash: "x".into(),
                full_name: username.to_uppercase(),
                role_id: role.id,
            })
            .await
            .unwrap();
        let permissions = store
            .permissions_for_role(role.id)
            .await
            .unwrap()
            .iter()
            .map(PermissionClaim::from)
            .collect();
        AuthContext {
            user_id: user.id,
            username: user.username,
            role_id: role.id,
            role: role.name,
            permissions,
            request_id: String::new(),
        }
    }

    async fn student(f: &Fixture, username: &str, advisor: Option<Uuid>) -> (AuthContext, Uuid) {
        let auth = account(&f.store, "student", username).await;
        let student = f
            .store
            .create_student(NewStudent {
                user_id: auth.user_id,
                student_number: format!("S-{}", username),
                program_study: "Informatics".into(),
                academic_year: "2022".into(),
                advisor_id: advisor,
            })
            .await
            .unwrap();
        (auth, student.id)
    }

    async fn add(
        f: &Fixture,
        student_id: Uuid,
        kind: AchievementType,
        details: serde_json::Value,
        created: DateTime<Utc>,
    ) -> Uuid {
        let (_, reference) = f
            .repo
            .submit_achievement(
                student_id,
                NewAchievement {
                    achievement_type: kind,
                    title: "t".into(),
                    description: "d".into(),
                    details: AchievementDetails::parse(kind, Some(details)).unwrap(),
                    tags: vec![],
                },
            )
            .await
            .unwrap();
        f.store.backdate_reference(reference.id, created).await;
        reference.id
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_query_validation() {
        let ok = StatisticsQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-01-31".into()),
            period: Some("yearly".into()),
            ..Default::default()
        }
        .parse()
        .unwrap();
        assert_eq!(ok.period, PeriodGranularity::Yearly);
        assert_eq!(ok.top_limit, DEFAULT_TOP_LIMIT);

        for bad in [
            StatisticsQuery {
                start_date: Some("01/02/2024".into()),
                ..Default::default()
            },
            StatisticsQuery {
                start_date: Some("2024-02-01".into()),
                end_date: Some("2024-01-01".into()),
                ..Default::default()
            },
            StatisticsQuery {
                top_limit: Some(0),
                ..Default::default()
            },
            StatisticsQuery {
                top_limit: Some(101),
                ..Default::default()
            },
            StatisticsQuery {
                status: Some("pending".into()),
                ..Default::default()
            },
            StatisticsQuery {
                period: Some("weekly".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(bad.parse(), Err(AppError::Validation { .. })));
        }
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[tokio::test]
    async fn test_percentages_sum_to_hundred() {
        let f = fixture();
        let admin = account(&f.store, "admin", "root").await;
        let (_, s) = student(&f, "sari", None).await;

        add(&f, s, AchievementType::Competition, json!({"level": "nasional"}), at(2024, 1, 5)).await;
        add(&f, s, AchievementType::Competition, json!({"level": "internasional"}), at(2024, 1, 9)).await;
        add(&f, s, AchievementType::Academic, json!({}), at(2024, 2, 1)).await;

        let report = f.service.report(&admin, &StatisticsQuery::default()).await.unwrap();

        let type_sum: f64 = report.total_by_type.iter().map(|t| t.percentage).sum();
        let level_sum: f64 = report.competition_levels.iter().map(|l| l.percentage).sum();
        assert!((type_sum - 100.0).abs() < 0.05);
        assert!((level_sum - 100.0).abs() < 0.05);

        assert_eq!(report.total_by_type[0].achievement_type, AchievementType::Competition);
        assert_eq!(report.total_by_type[0].count, 2);
        assert!(report
            .competition_levels
            .iter()
            .any(|l| l.level == UNKNOWN_LEVEL && l.count == 1));

        let periods: Vec<&str> = report.total_by_period.iter().map(|p| p.period.as_str()).collect();
        assert_eq!(periods, vec!["2024-01", "2024-02"]);
        assert_eq!(report.summary.total_achievements, 3);
        assert_eq!(report.summary.total_students, 1);
        let range = report.summary.date_range.unwrap();
        assert_eq!(range.start_date, at(2024, 1, 5));
        assert_eq!(range.end_date, at(2024, 2, 1));
    }

    #[tokio::test]
    async fn test_deleted_and_orphaned_are_excluded() {
        let f = fixture();
        let admin = account(&f.store, "admin", "root").await;
        let (_, s) = student(&f, "sari", None).await;

        let kept = add(&f, s, AchievementType::Academic, json!({}), at(2024, 3, 1)).await;
        let deleted = add(&f, s, AchievementType::Academic, json!({}), at(2024, 3, 2)).await;
        let content_id = f.repo.find_reference(deleted).await.unwrap().unwrap().content_id;
        f.repo.delete_achievement(deleted, &content_id).await.unwrap();

        let report = f.service.report(&admin, &StatisticsQuery::default()).await.unwrap();
        assert_eq!(report.summary.total_achievements, 1);
        assert_eq!(report.top_students[0].total_count, 1);
        assert!(f.repo.get_by_reference(kept).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_end_date_includes_whole_day() {
        let f = fixture();
        let admin = account(&f.store, "admin", "root").await;
        let (_, s) = student(&f, "sari", None).await;
        add(&f, s, AchievementType::Other, json!({}), at(2024, 5, 31)).await;
        add(&f, s, AchievementType::Other, json!({}), at(2024, 6, 1)).await;

        let report = f
            .service
            .report(
                &admin,
                &StatisticsQuery {
                    start_date: Some("2024-05-01".into()),
                    end_date: Some("2024-05-31".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.summary.total_achievements, 1);
    }

    #[tokio::test]
    async fn test_scope_and_ranking() {
        let f = fixture();
        let lecturer_auth = account(&f.store, "lecturer", "dosen").await;
        let lecturer = f
            .store
            .create_lecturer(NewLecturer {
                user_id: lecturer_auth.user_id,
                lecturer_number: "L-1".into(),
                department: "Informatics".into(),
            })
            .await
            .unwrap();

        let (sari_auth, sari) = student(&f, "sari", Some(lecturer.id)).await;
        let (_, budi) = student(&f, "budi", Some(lecturer.id)).await;
        let (_, joko) = student(&f, "joko", None).await;

        let verified = add(&f, budi, AchievementType::Academic, json!({}), at(2024, 1, 1)).await;
        f.repo.mark_submitted(verified).await.unwrap();
        f.repo.mark_verified(verified, lecturer_auth.user_id).await.unwrap();
        add(&f, sari, AchievementType::Academic, json!({}), at(2024, 1, 2)).await;
        add(&f, joko, AchievementType::Academic, json!({}), at(2024, 1, 3)).await;
        add(&f, joko, AchievementType::Academic, json!({}), at(2024, 1, 4)).await;

        let advisees = f
            .service
            .report(&lecturer_auth, &StatisticsQuery::default())
            .await
            .unwrap();
        assert_eq!(advisees.summary.total_achievements, 2);
        assert_eq!(advisees.summary.verified_achievements, 1);
        // Same total, budi wins on verified count
        assert_eq!(advisees.top_students[0].student_id, budi);
        assert_eq!(advisees.top_students[0].full_name, "BUDI");
        assert_eq!(advisees.top_students[1].student_id, sari);

        let own = f
            .service
            .report(&sari_auth, &StatisticsQuery::default())
            .await
            .unwrap();
        assert_eq!(own.summary.total_achievements, 1);
        assert_eq!(own.top_students.len(), 1);
    }

    #[tokio::test]
    async fn test_lecturer_without_advisees_gets_empty_report() {
        let f = fixture();
        let auth = account(&f.store, "lecturer", "dosen").await;
        f.store
            .create_lecturer(NewLecturer {
                user_id: auth.user_id,
                lecturer_number: "L-1".into(),
                department: "Informatics".into(),
            })
            .await
            .unwrap();
        let (_, s) = student(&f, "sari", None).await;
        add(&f, s, AchievementType::Academic, json!({}), at(2024, 1, 1)).await;

        let report = f.service.report(&auth, &StatisticsQuery::default()).await.unwrap();
        assert_eq!(report, StatisticsReport::default());
    }
}
