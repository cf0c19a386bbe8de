use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "aula.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates the schema idempotently. Also used by unit tests against an
/// in-memory connection.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            email TEXT,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin','teacher')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open' CHECK(status IN ('open','closed')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bimesters(
            id TEXT PRIMARY KEY,
            year_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'open_fill' CHECK(status IN ('open_fill','closed')),
            start_date TEXT,
            end_date TEXT,
            FOREIGN KEY(year_id) REFERENCES academic_years(id),
            UNIQUE(year_id, number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bimesters_year ON bimesters(year_id)",
        [],
    )?;
    // Workspaces created before bimesters carried calendar dates.
    ensure_bimester_dates(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            level_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(level_id) REFERENCES levels(id),
            UNIQUE(level_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_level ON grades(level_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            UNIQUE(grade_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_grade ON sections(grade_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            profile_id TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(profile_id) REFERENCES profiles(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_code TEXT,
            dni TEXT UNIQUE,
            first_names TEXT NOT NULL,
            last_names TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            section_id TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade ON students(grade_id)",
        [],
    )?;

    // Roster membership for grading is computed from enrollments, never from
    // the student's current grade/section columns (those drift mid-year).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            year_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            section_id TEXT,
            PRIMARY KEY(year_id, student_id),
            FOREIGN KEY(year_id) REFERENCES academic_years(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_scope ON enrollments(year_id, grade_id, section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_assignments(
            id TEXT PRIMARY KEY,
            year_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            section_id TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(year_id) REFERENCES academic_years(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_year ON teacher_assignments(year_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher ON teacher_assignments(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS qualitative_grades(
            id TEXT PRIMARY KEY,
            bimester_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            value TEXT NOT NULL CHECK(value IN ('AD','A','B','C')),
            updated_by TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(bimester_id) REFERENCES bimesters(id),
            FOREIGN KEY(assignment_id) REFERENCES teacher_assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(bimester_id, assignment_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_qualitative_grades_assignment ON qualitative_grades(assignment_id, bimester_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_qualitative_grades_student ON qualitative_grades(student_id)",
        [],
    )?;

    // Attendance and appreciations are per (bimester, student), independent
    // of the course.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_bimester(
            id TEXT PRIMARY KEY,
            bimester_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attendances INTEGER NOT NULL DEFAULT 0,
            absences INTEGER NOT NULL DEFAULT 0,
            justifications INTEGER NOT NULL DEFAULT 0,
            updated_by TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(bimester_id) REFERENCES bimesters(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(bimester_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_bimester ON attendance_bimester(bimester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tutor_appreciations(
            id TEXT PRIMARY KEY,
            bimester_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            text TEXT NOT NULL,
            updated_by TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(bimester_id) REFERENCES bimesters(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(bimester_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tutor_appreciations_bimester ON tutor_appreciations(bimester_id)",
        [],
    )?;

    Ok(())
}

fn ensure_bimester_dates(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "bimesters", "start_date")? {
        conn.execute("ALTER TABLE bimesters ADD COLUMN start_date TEXT", [])?;
    }
    if !table_has_column(conn, "bimesters", "end_date")? {
        conn.execute("ALTER TABLE bimesters ADD COLUMN end_date TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
