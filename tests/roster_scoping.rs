use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_aulad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn aulad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

struct Rid(u32);

impl Rid {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

struct School {
    year_id: String,
    grade_id: String,
    section_b: String,
    course_id: String,
    teacher_id: String,
    teacher_profile: String,
    admin_profile: String,
}

/// One grade with sections A and B, one student enrolled in each section.
fn seed_two_sections(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    rid: &mut Rid,
    workspace: &std::path::Path,
) -> School {
    let _ = request_ok(
        stdin,
        reader,
        &rid.next(),
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = request_ok(
        stdin,
        reader,
        &rid.next(),
        "profiles.create",
        json!({ "fullName": "Ada Admin", "role": "admin" }),
    );
    let admin_profile = str_field(&admin, "profileId");
    let _ = request_ok(
        stdin,
        reader,
        &rid.next(),
        "session.open",
        json!({ "profileId": admin_profile }),
    );

    let year = request_ok(stdin, reader, &rid.next(), "years.create", json!({ "name": "2026" }));
    let year_id = str_field(&year, "yearId");
    let level = request_ok(
        stdin,
        reader,
        &rid.next(),
        "levels.create",
        json!({ "name": "Secundaria" }),
    );
    let grade = request_ok(
        stdin,
        reader,
        &rid.next(),
        "grades.create",
        json!({ "levelId": str_field(&level, "levelId"), "name": "1st" }),
    );
    let grade_id = str_field(&grade, "gradeId");
    let section_b = request_ok(
        stdin,
        reader,
        &rid.next(),
        "sections.create",
        json!({ "gradeId": grade_id, "name": "B" }),
    );
    let course = request_ok(
        stdin,
        reader,
        &rid.next(),
        "courses.create",
        json!({ "name": "History" }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        &rid.next(),
        "teachers.create",
        json!({ "fullName": "Elena Vargas" }),
    );

    // Section A comes from the import itself; B exists already.
    let import = request_ok(
        stdin,
        reader,
        &rid.next(),
        "students.import",
        json!({
            "yearId": year_id,
            "rows": [
                {
                    "firstNames": "Ana",
                    "lastNames": "Aguilar",
                    "dni": "70000010",
                    "level": "Secundaria",
                    "grade": "1st",
                    "section": "A"
                },
                {
                    "firstNames": "Bruno",
                    "lastNames": "Zapata",
                    "dni": "70000011",
                    "level": "Secundaria",
                    "grade": "1st",
                    "section": "B"
                }
            ]
        }),
    );
    assert_eq!(import.get("imported").and_then(|v| v.as_i64()), Some(2));

    School {
        year_id,
        grade_id,
        section_b: str_field(&section_b, "sectionId"),
        course_id: str_field(&course, "courseId"),
        teacher_id: str_field(&teacher, "teacherId"),
        teacher_profile: str_field(&teacher, "profileId"),
        admin_profile,
    }
}

fn create_assignment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    rid: &mut Rid,
    s: &School,
    section_id: Option<&str>,
) -> String {
    let mut params = json!({
        "yearId": s.year_id,
        "teacherId": s.teacher_id,
        "courseId": s.course_id,
        "gradeId": s.grade_id
    });
    if let Some(id) = section_id {
        params["sectionId"] = json!(id);
    }
    let created = request_ok(stdin, reader, &rid.next(), "assignments.create", params);
    str_field(&created, "assignmentId")
}

fn roster_last_names(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    rid: &mut Rid,
    assignment_id: &str,
) -> Vec<String> {
    let roster = request_ok(
        stdin,
        reader,
        &rid.next(),
        "gradebook.roster",
        json!({ "assignmentId": assignment_id }),
    );
    roster["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|s| str_field(s, "lastNames"))
        .collect()
}

#[test]
fn section_assignment_sees_only_its_section() {
    let workspace = temp_dir("aulad-roster-section");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut rid = Rid(0);
    let s = seed_two_sections(&mut stdin, &mut reader, &mut rid, &workspace);

    let section_a = {
        let sections = request_ok(
            &mut stdin,
            &mut reader,
            &rid.next(),
            "sections.list",
            json!({ "gradeId": s.grade_id }),
        );
        let arr = sections["sections"].as_array().expect("sections");
        let a = arr
            .iter()
            .find(|sec| sec.get("name").and_then(|v| v.as_str()) == Some("A"))
            .expect("section A created by the import");
        str_field(a, "id")
    };

    let on_a = create_assignment(&mut stdin, &mut reader, &mut rid, &s, Some(&section_a));
    assert_eq!(
        roster_last_names(&mut stdin, &mut reader, &mut rid, &on_a),
        vec!["Aguilar".to_string()]
    );

    // No section on the assignment means the whole grade, ordered by last
    // names.
    let on_grade = create_assignment(&mut stdin, &mut reader, &mut rid, &s, None);
    assert_eq!(
        roster_last_names(&mut stdin, &mut reader, &mut rid, &on_grade),
        vec!["Aguilar".to_string(), "Zapata".to_string()]
    );
}

#[test]
fn roster_follows_the_enrollment_not_the_student_record() {
    let workspace = temp_dir("aulad-roster-drift");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut rid = Rid(0);
    let s = seed_two_sections(&mut stdin, &mut reader, &mut rid, &workspace);

    let on_b = create_assignment(&mut stdin, &mut reader, &mut rid, &s, Some(&s.section_b));
    assert_eq!(
        roster_last_names(&mut stdin, &mut reader, &mut rid, &on_b),
        vec!["Zapata".to_string()]
    );

    // Move Ana's enrollment to section B. Her students row still says A,
    // but the year's roster is what the gradebook reads.
    let students = request_ok(&mut stdin, &mut reader, &rid.next(), "students.list", json!({}));
    let ana = students["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|st| st.get("dni").and_then(|v| v.as_str()) == Some("70000010"))
        .cloned()
        .expect("Ana imported");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "enrollments.set",
        json!({
            "yearId": s.year_id,
            "studentId": str_field(&ana, "id"),
            "gradeId": s.grade_id,
            "sectionId": s.section_b
        }),
    );

    assert_eq!(
        roster_last_names(&mut stdin, &mut reader, &mut rid, &on_b),
        vec!["Aguilar".to_string(), "Zapata".to_string()]
    );
    assert_eq!(ana.get("sectionName").and_then(|v| v.as_str()), Some("A"));
}

#[test]
fn teacher_session_is_scoped_to_own_assignments() {
    let workspace = temp_dir("aulad-roster-owner");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut rid = Rid(0);
    let s = seed_two_sections(&mut stdin, &mut reader, &mut rid, &workspace);

    let own = create_assignment(&mut stdin, &mut reader, &mut rid, &s, None);
    let other_teacher = request_ok(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "teachers.create",
        json!({ "fullName": "Jorge Salas" }),
    );
    let foreign = request_ok(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "assignments.create",
        json!({
            "yearId": s.year_id,
            "teacherId": str_field(&other_teacher, "teacherId"),
            "courseId": s.course_id,
            "gradeId": s.grade_id,
            "sectionId": s.section_b
        }),
    );
    let foreign_id = str_field(&foreign, "assignmentId");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "session.open",
        json!({ "profileId": s.teacher_profile }),
    );

    let mine = request_ok(&mut stdin, &mut reader, &rid.next(), "assignments.mine", json!({}));
    let ids: Vec<String> = mine["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .map(|a| str_field(a, "id"))
        .collect();
    assert_eq!(ids, vec![own.clone()]);

    // Own gradebook opens; a colleague's does not.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "gradebook.open",
        json!({ "assignmentId": own }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "gradebook.roster",
        json!({ "assignmentId": foreign_id }),
    );
    assert_eq!(code, "forbidden");

    // An admin session sees both.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "session.open",
        json!({ "profileId": s.admin_profile }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &rid.next(),
        "gradebook.roster",
        json!({ "assignmentId": foreign_id }),
    );
}
