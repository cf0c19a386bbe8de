//! Bimester-gated gradebook write engine.
//!
//! All teacher-entered records (qualitative grades, attendance counters,
//! tutor appreciations) funnel through here. A bimester's `open_fill`
//! status is the single write gate; every field write is one idempotent
//! upsert on its uniqueness key, so repeated submissions overwrite instead
//! of duplicating and concurrent edits resolve last-write-wins.

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GradebookError {
    #[error("bimester is not open for filling")]
    PeriodLocked,
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("store unavailable: {0}")]
    Store(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeValue {
    Ad,
    A,
    B,
    C,
}

impl GradeValue {
    pub fn parse(s: &str) -> Result<Self, GradebookError> {
        match s {
            "AD" => Ok(Self::Ad),
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => Err(GradebookError::InvalidValue(format!(
                "grade must be one of AD/A/B/C, got {:?}",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ad => "AD",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BimesterStatus {
    OpenFill,
    Closed,
}

impl BimesterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenFill => "open_fill",
            Self::Closed => "closed",
        }
    }

    fn parse(s: &str) -> Self {
        // The column CHECK constraint only admits these two values.
        if s == "open_fill" {
            Self::OpenFill
        } else {
            Self::Closed
        }
    }
}

/// Roster scope of one teacher assignment. `section_id` None means the
/// assignment spans every section of the grade.
#[derive(Debug, Clone)]
pub struct AssignmentScope {
    pub year_id: String,
    pub teacher_id: String,
    pub course_id: String,
    pub grade_id: String,
    pub section_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub first_names: String,
    pub last_names: String,
    pub dni: Option<String>,
    pub student_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceCounts {
    pub attendances: i64,
    pub absences: i64,
    pub justifications: i64,
}

/// Partial attendance edit; absent fields keep their stored value
/// (0 when no row exists yet).
#[derive(Debug, Clone, Copy, Default)]
pub struct AttendancePatch {
    pub attendances: Option<i64>,
    pub absences: Option<i64>,
    pub justifications: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentEntry {
    pub grade: Option<String>,
    pub attendance: Option<AttendanceCounts>,
    pub appreciation: Option<String>,
}

#[derive(Debug)]
pub struct GradebookView {
    pub roster: Vec<RosterStudent>,
    pub entries: HashMap<String, StudentEntry>,
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn assignment_scope(
    conn: &Connection,
    assignment_id: &str,
) -> Result<AssignmentScope, GradebookError> {
    conn.query_row(
        "SELECT year_id, teacher_id, course_id, grade_id, section_id
         FROM teacher_assignments
         WHERE id = ?",
        [assignment_id],
        |r| {
            Ok(AssignmentScope {
                year_id: r.get(0)?,
                teacher_id: r.get(1)?,
                course_id: r.get(2)?,
                grade_id: r.get(3)?,
                section_id: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or(GradebookError::NotFound("assignment"))
}

/// Resolves the students a teacher must grade for one assignment.
///
/// Membership comes from the enrollments of the assignment's year, not from
/// the students' current grade/section columns. An empty roster is a valid
/// result, not an error.
pub fn resolve_roster(
    conn: &Connection,
    scope: &AssignmentScope,
) -> Result<Vec<RosterStudent>, GradebookError> {
    let sql = if scope.section_id.is_some() {
        "SELECT s.id, s.first_names, s.last_names, s.dni, s.student_code
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.year_id = ? AND e.grade_id = ? AND e.section_id = ?
         ORDER BY s.last_names, s.first_names"
    } else {
        "SELECT s.id, s.first_names, s.last_names, s.dni, s.student_code
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.year_id = ? AND e.grade_id = ?
         ORDER BY s.last_names, s.first_names"
    };
    let mut stmt = conn.prepare(sql)?;
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(RosterStudent {
            id: r.get(0)?,
            first_names: r.get(1)?,
            last_names: r.get(2)?,
            dni: r.get(3)?,
            student_code: r.get(4)?,
        })
    };
    let rows = if let Some(section_id) = &scope.section_id {
        stmt.query_map((&scope.year_id, &scope.grade_id, section_id), map_row)?
            .collect::<Result<Vec<_>, _>>()?
    } else {
        stmt.query_map((&scope.year_id, &scope.grade_id), map_row)?
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(rows)
}

pub fn bimester_status(
    conn: &Connection,
    bimester_id: &str,
) -> Result<BimesterStatus, GradebookError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM bimesters WHERE id = ?",
            [bimester_id],
            |r| r.get(0),
        )
        .optional()?;
    match status {
        Some(s) => Ok(BimesterStatus::parse(&s)),
        None => Err(GradebookError::NotFound("bimester")),
    }
}

/// The period lock gate. Every gradebook write consults this first; no
/// mutation happens when the bimester is closed.
pub fn ensure_open_for_fill(conn: &Connection, bimester_id: &str) -> Result<(), GradebookError> {
    match bimester_status(conn, bimester_id)? {
        BimesterStatus::OpenFill => Ok(()),
        BimesterStatus::Closed => Err(GradebookError::PeriodLocked),
    }
}

pub fn set_grade(
    conn: &Connection,
    bimester_id: &str,
    assignment_id: &str,
    student_id: &str,
    value: &str,
    updated_by: Option<&str>,
) -> Result<(), GradebookError> {
    ensure_open_for_fill(conn, bimester_id)?;
    let value = GradeValue::parse(value)?;
    // Reject unknown assignments up front; the FK would also catch it but
    // with an opaque store error.
    let _ = assignment_scope(conn, assignment_id)?;
    conn.execute(
        "INSERT INTO qualitative_grades(id, bimester_id, assignment_id, student_id, value, updated_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(bimester_id, assignment_id, student_id) DO UPDATE SET
           value = excluded.value,
           updated_by = excluded.updated_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            bimester_id,
            assignment_id,
            student_id,
            value.as_str(),
            updated_by,
            now_ts(),
        ),
    )?;
    Ok(())
}

pub fn set_attendance(
    conn: &Connection,
    bimester_id: &str,
    student_id: &str,
    patch: AttendancePatch,
    updated_by: Option<&str>,
) -> Result<AttendanceCounts, GradebookError> {
    ensure_open_for_fill(conn, bimester_id)?;
    for (field, v) in [
        ("attendances", patch.attendances),
        ("absences", patch.absences),
        ("justifications", patch.justifications),
    ] {
        if let Some(v) = v {
            if v < 0 {
                return Err(GradebookError::InvalidValue(format!(
                    "{} must be a non-negative integer",
                    field
                )));
            }
        }
    }

    let existing: Option<AttendanceCounts> = conn
        .query_row(
            "SELECT attendances, absences, justifications
             FROM attendance_bimester
             WHERE bimester_id = ? AND student_id = ?",
            (bimester_id, student_id),
            |r| {
                Ok(AttendanceCounts {
                    attendances: r.get(0)?,
                    absences: r.get(1)?,
                    justifications: r.get(2)?,
                })
            },
        )
        .optional()?;
    let current = existing.unwrap_or(AttendanceCounts {
        attendances: 0,
        absences: 0,
        justifications: 0,
    });
    let merged = AttendanceCounts {
        attendances: patch.attendances.unwrap_or(current.attendances),
        absences: patch.absences.unwrap_or(current.absences),
        justifications: patch.justifications.unwrap_or(current.justifications),
    };

    // All three counters go out in one upsert so a partial row is never
    // visible.
    conn.execute(
        "INSERT INTO attendance_bimester(id, bimester_id, student_id, attendances, absences, justifications, updated_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(bimester_id, student_id) DO UPDATE SET
           attendances = excluded.attendances,
           absences = excluded.absences,
           justifications = excluded.justifications,
           updated_by = excluded.updated_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            bimester_id,
            student_id,
            merged.attendances,
            merged.absences,
            merged.justifications,
            updated_by,
            now_ts(),
        ),
    )?;
    Ok(merged)
}

/// Empty text is valid and clears the comment.
pub fn set_appreciation(
    conn: &Connection,
    bimester_id: &str,
    student_id: &str,
    text: &str,
    updated_by: Option<&str>,
) -> Result<(), GradebookError> {
    ensure_open_for_fill(conn, bimester_id)?;
    conn.execute(
        "INSERT INTO tutor_appreciations(id, bimester_id, student_id, text, updated_by, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(bimester_id, student_id) DO UPDATE SET
           text = excluded.text,
           updated_by = excluded.updated_by,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            bimester_id,
            student_id,
            text,
            updated_by,
            now_ts(),
        ),
    )?;
    Ok(())
}

/// Read-side aggregation for the gradebook surface: the roster plus a map
/// from student id to whatever has been recorded so far. Absent map entries
/// mean "ungraded"; the {0,0,0} attendance default is a display concern of
/// the caller.
pub fn load_gradebook(
    conn: &Connection,
    assignment_id: &str,
    bimester_id: &str,
) -> Result<GradebookView, GradebookError> {
    let scope = assignment_scope(conn, assignment_id)?;
    // Surface an unknown bimester as NotFound rather than an empty view.
    let _ = bimester_status(conn, bimester_id)?;
    let roster = resolve_roster(conn, &scope)?;

    let mut entries: HashMap<String, StudentEntry> = HashMap::new();
    if roster.is_empty() {
        return Ok(GradebookView { roster, entries });
    }

    let placeholders = vec!["?"; roster.len()].join(", ");
    let ids: Vec<&str> = roster.iter().map(|s| s.id.as_str()).collect();

    let sql = format!(
        "SELECT student_id, value FROM qualitative_grades
         WHERE bimester_id = ? AND assignment_id = ? AND student_id IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params_from_iter([bimester_id, assignment_id].into_iter().chain(ids.iter().copied())),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, value) in rows {
        entries.entry(student_id).or_default().grade = Some(value);
    }

    let sql = format!(
        "SELECT student_id, attendances, absences, justifications FROM attendance_bimester
         WHERE bimester_id = ? AND student_id IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params_from_iter(std::iter::once(bimester_id).chain(ids.iter().copied())),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    AttendanceCounts {
                        attendances: r.get(1)?,
                        absences: r.get(2)?,
                        justifications: r.get(3)?,
                    },
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, counts) in rows {
        entries.entry(student_id).or_default().attendance = Some(counts);
    }

    let sql = format!(
        "SELECT student_id, text FROM tutor_appreciations
         WHERE bimester_id = ? AND student_id IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params_from_iter(std::iter::once(bimester_id).chain(ids.iter().copied())),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, text) in rows {
        entries.entry(student_id).or_default().appreciation = Some(text);
    }

    Ok(GradebookView { roster, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    struct Fixture {
        conn: Connection,
        year_id: String,
        bimester_id: String,
        grade_id: String,
        section_a: String,
        section_b: String,
        assignment_id: String,
        teacher_id: String,
    }

    fn ts() -> String {
        now_ts()
    }

    fn insert_student(
        conn: &Connection,
        last: &str,
        first: &str,
        grade_id: &str,
        section_id: Option<&str>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO students(id, first_names, last_names, grade_id, section_id, active, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
            (&id, first, last, grade_id, section_id, ts(), ts()),
        )
        .expect("insert student");
        id
    }

    fn enroll(
        conn: &Connection,
        year_id: &str,
        student_id: &str,
        grade_id: &str,
        section_id: Option<&str>,
    ) {
        conn.execute(
            "INSERT INTO enrollments(year_id, student_id, grade_id, section_id)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(year_id, student_id) DO UPDATE SET
               grade_id = excluded.grade_id,
               section_id = excluded.section_id",
            (year_id, student_id, grade_id, section_id),
        )
        .expect("enroll");
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("schema");

        let year_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO academic_years(id, name, status, created_at) VALUES(?, '2026', 'open', ?)",
            (&year_id, ts()),
        )
        .expect("year");

        let bimester_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO bimesters(id, year_id, number, status) VALUES(?, ?, 1, 'open_fill')",
            (&bimester_id, &year_id),
        )
        .expect("bimester");

        let level_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO levels(id, name) VALUES(?, 'Primaria')",
            [&level_id],
        )
        .expect("level");
        let grade_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO grades(id, level_id, name) VALUES(?, ?, '3rd')",
            (&grade_id, &level_id),
        )
        .expect("grade");
        let section_a = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO sections(id, grade_id, name) VALUES(?, ?, 'A')",
            (&section_a, &grade_id),
        )
        .expect("section A");
        let section_b = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO sections(id, grade_id, name) VALUES(?, ?, 'B')",
            (&section_b, &grade_id),
        )
        .expect("section B");

        let course_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO courses(id, name, active) VALUES(?, 'Math', 1)",
            [&course_id],
        )
        .expect("course");

        let profile_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO profiles(id, full_name, role, created_at) VALUES(?, 'T. Quispe', 'teacher', ?)",
            (&profile_id, ts()),
        )
        .expect("profile");
        let teacher_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO teachers(id, profile_id, active, created_at) VALUES(?, ?, 1, ?)",
            (&teacher_id, &profile_id, ts()),
        )
        .expect("teacher");

        let assignment_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO teacher_assignments(id, year_id, teacher_id, course_id, grade_id, section_id, active, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
            (
                &assignment_id,
                &year_id,
                &teacher_id,
                &course_id,
                &grade_id,
                Some(section_a.as_str()),
                ts(),
            ),
        )
        .expect("assignment");

        Fixture {
            conn,
            year_id,
            bimester_id,
            grade_id,
            section_a,
            section_b,
            assignment_id,
            teacher_id,
        }
    }

    fn close_bimester(f: &Fixture) {
        f.conn
            .execute(
                "UPDATE bimesters SET status = 'closed' WHERE id = ?",
                [&f.bimester_id],
            )
            .expect("close bimester");
    }

    fn grade_rows(f: &Fixture, student_id: &str) -> Vec<String> {
        let mut stmt = f
            .conn
            .prepare(
                "SELECT value FROM qualitative_grades
                 WHERE bimester_id = ? AND assignment_id = ? AND student_id = ?",
            )
            .expect("prepare");
        stmt.query_map((&f.bimester_id, &f.assignment_id, student_id), |r| {
            r.get::<_, String>(0)
        })
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect")
    }

    #[test]
    fn set_grade_is_an_idempotent_upsert() {
        let f = fixture();
        let s = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s, &f.grade_id, Some(&f.section_a));

        set_grade(&f.conn, &f.bimester_id, &f.assignment_id, &s, "A", None).expect("first write");
        set_grade(&f.conn, &f.bimester_id, &f.assignment_id, &s, "A", None).expect("second write");
        assert_eq!(grade_rows(&f, &s), vec!["A".to_string()]);

        set_grade(&f.conn, &f.bimester_id, &f.assignment_id, &s, "AD", None).expect("overwrite");
        assert_eq!(grade_rows(&f, &s), vec!["AD".to_string()]);
    }

    #[test]
    fn invalid_grade_value_is_rejected_without_a_row() {
        let f = fixture();
        let s = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s, &f.grade_id, Some(&f.section_a));

        let err = set_grade(&f.conn, &f.bimester_id, &f.assignment_id, &s, "Z", None)
            .expect_err("Z must be rejected");
        assert!(matches!(err, GradebookError::InvalidValue(_)));
        assert!(grade_rows(&f, &s).is_empty());
    }

    #[test]
    fn closed_bimester_rejects_all_writes_and_keeps_rows() {
        let f = fixture();
        let s = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s, &f.grade_id, Some(&f.section_a));

        set_grade(&f.conn, &f.bimester_id, &f.assignment_id, &s, "AD", None).expect("open write");
        close_bimester(&f);

        let err = set_grade(&f.conn, &f.bimester_id, &f.assignment_id, &s, "A", None)
            .expect_err("closed bimester");
        assert!(matches!(err, GradebookError::PeriodLocked));
        assert_eq!(grade_rows(&f, &s), vec!["AD".to_string()]);

        let err = set_attendance(
            &f.conn,
            &f.bimester_id,
            &s,
            AttendancePatch {
                attendances: Some(10),
                ..Default::default()
            },
            None,
        )
        .expect_err("closed bimester");
        assert!(matches!(err, GradebookError::PeriodLocked));

        let err = set_appreciation(&f.conn, &f.bimester_id, &s, "hi", None)
            .expect_err("closed bimester");
        assert!(matches!(err, GradebookError::PeriodLocked));
    }

    #[test]
    fn attendance_patch_merges_with_stored_counters() {
        let f = fixture();
        let s = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s, &f.grade_id, Some(&f.section_a));

        set_attendance(
            &f.conn,
            &f.bimester_id,
            &s,
            AttendancePatch {
                absences: Some(2),
                ..Default::default()
            },
            None,
        )
        .expect("first patch");
        let merged = set_attendance(
            &f.conn,
            &f.bimester_id,
            &s,
            AttendancePatch {
                attendances: Some(10),
                ..Default::default()
            },
            None,
        )
        .expect("second patch");
        assert_eq!(
            merged,
            AttendanceCounts {
                attendances: 10,
                absences: 2,
                justifications: 0
            }
        );

        let count: i64 = f
            .conn
            .query_row(
                "SELECT COUNT(*) FROM attendance_bimester WHERE bimester_id = ? AND student_id = ?",
                (&f.bimester_id, &s),
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn negative_attendance_counter_is_invalid() {
        let f = fixture();
        let s = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        let err = set_attendance(
            &f.conn,
            &f.bimester_id,
            &s,
            AttendancePatch {
                justifications: Some(-1),
                ..Default::default()
            },
            None,
        )
        .expect_err("negative counter");
        assert!(matches!(err, GradebookError::InvalidValue(_)));
    }

    #[test]
    fn empty_appreciation_clears_the_comment() {
        let f = fixture();
        let s = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s, &f.grade_id, Some(&f.section_a));

        set_appreciation(&f.conn, &f.bimester_id, &s, "needs support in algebra", None)
            .expect("set");
        set_appreciation(&f.conn, &f.bimester_id, &s, "", None).expect("clear");

        let view = load_gradebook(&f.conn, &f.assignment_id, &f.bimester_id).expect("view");
        assert_eq!(
            view.entries.get(&s).and_then(|e| e.appreciation.as_deref()),
            Some("")
        );
    }

    #[test]
    fn roster_scoping_follows_the_assignment_section() {
        let f = fixture();
        let in_a = insert_student(&f.conn, "Alvarez", "Maria", &f.grade_id, Some(&f.section_a));
        let in_b = insert_student(&f.conn, "Zapata", "Jose", &f.grade_id, Some(&f.section_b));
        enroll(&f.conn, &f.year_id, &in_a, &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &in_b, &f.grade_id, Some(&f.section_b));

        // Section-bound assignment sees only its section.
        let scope = assignment_scope(&f.conn, &f.assignment_id).expect("scope");
        let roster = resolve_roster(&f.conn, &scope).expect("roster");
        assert_eq!(
            roster.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec![in_a.as_str()]
        );

        // A null section spans every section of the grade.
        let whole_grade = AssignmentScope {
            section_id: None,
            ..scope
        };
        let roster = resolve_roster(&f.conn, &whole_grade).expect("roster");
        assert_eq!(
            roster.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec![in_a.as_str(), in_b.as_str()]
        );
    }

    #[test]
    fn roster_uses_enrollment_not_current_placement() {
        let f = fixture();
        let s = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s, &f.grade_id, Some(&f.section_a));

        // Mid-year catalog drift: the student's current section moves, the
        // enrollment for the year stays.
        f.conn
            .execute(
                "UPDATE students SET section_id = ? WHERE id = ?",
                (&f.section_b, &s),
            )
            .expect("drift");

        let scope = assignment_scope(&f.conn, &f.assignment_id).expect("scope");
        let roster = resolve_roster(&f.conn, &scope).expect("roster");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, s);
    }

    #[test]
    fn empty_roster_is_ok_not_an_error() {
        let f = fixture();
        let scope = assignment_scope(&f.conn, &f.assignment_id).expect("scope");
        let roster = resolve_roster(&f.conn, &scope).expect("roster");
        assert!(roster.is_empty());

        let view = load_gradebook(&f.conn, &f.assignment_id, &f.bimester_id).expect("view");
        assert!(view.roster.is_empty());
        assert!(view.entries.is_empty());
    }

    #[test]
    fn load_gradebook_merges_the_three_record_kinds() {
        let f = fixture();
        let s1 = insert_student(&f.conn, "Alvarez", "Maria", &f.grade_id, Some(&f.section_a));
        let s2 = insert_student(&f.conn, "Lopez", "Ana", &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s1, &f.grade_id, Some(&f.section_a));
        enroll(&f.conn, &f.year_id, &s2, &f.grade_id, Some(&f.section_a));

        set_grade(&f.conn, &f.bimester_id, &f.assignment_id, &s1, "B", None).expect("grade");
        set_attendance(
            &f.conn,
            &f.bimester_id,
            &s1,
            AttendancePatch {
                attendances: Some(38),
                absences: Some(1),
                justifications: Some(1),
            },
            None,
        )
        .expect("attendance");

        let view = load_gradebook(&f.conn, &f.assignment_id, &f.bimester_id).expect("view");
        assert_eq!(view.roster.len(), 2);

        let e1 = view.entries.get(&s1).expect("entry for graded student");
        assert_eq!(e1.grade.as_deref(), Some("B"));
        assert_eq!(
            e1.attendance,
            Some(AttendanceCounts {
                attendances: 38,
                absences: 1,
                justifications: 1
            })
        );
        assert!(e1.appreciation.is_none());

        // Ungraded students have no entry at all.
        assert!(view.entries.get(&s2).is_none());
    }

    #[test]
    fn unknown_assignment_and_bimester_are_not_found() {
        let f = fixture();
        let err = assignment_scope(&f.conn, "missing").expect_err("missing assignment");
        assert!(matches!(err, GradebookError::NotFound("assignment")));

        let err = bimester_status(&f.conn, "missing").expect_err("missing bimester");
        assert!(matches!(err, GradebookError::NotFound("bimester")));

        let err = set_grade(&f.conn, &f.bimester_id, "missing", "student", "A", None)
            .expect_err("missing assignment on write");
        assert!(matches!(err, GradebookError::NotFound("assignment")));
    }

    #[test]
    fn teacher_ownership_is_visible_on_the_scope() {
        let f = fixture();
        let scope = assignment_scope(&f.conn, &f.assignment_id).expect("scope");
        assert_eq!(scope.teacher_id, f.teacher_id);
    }
}
