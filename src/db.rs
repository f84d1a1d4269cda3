use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoolhub.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            level TEXT,
            stream TEXT,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_links(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            UNIQUE(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_links_class ON subject_links(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_links(
            id TEXT PRIMARY KEY,
            subject_link_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            status TEXT NOT NULL,
            is_lead_teacher INTEGER NOT NULL DEFAULT 0,
            assigned_by TEXT,
            approved_at TEXT,
            UNIQUE(subject_link_id, teacher_id),
            FOREIGN KEY(subject_link_id) REFERENCES subject_links(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_links_subject_link ON teacher_links(subject_link_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_links_teacher ON teacher_links(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_links(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            enrollment_type TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            enrolled_by TEXT,
            UNIQUE(class_id, student_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_links_class ON student_links(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_links_student ON student_links(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prefects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            position TEXT NOT NULL,
            assigned_at TEXT NOT NULL,
            assigned_by TEXT,
            UNIQUE(class_id, student_id, position),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_prefects_class ON prefects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            instructions TEXT,
            due_at TEXT NOT NULL,
            total_marks REAL NOT NULL,
            status TEXT NOT NULL,
            visible_to_students INTEGER NOT NULL DEFAULT 0,
            allow_late INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_class ON assignments(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            content TEXT,
            attachment_ids TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            status TEXT NOT NULL,
            marks_awarded REAL,
            feedback TEXT,
            rubric_lines TEXT,
            graded_by TEXT,
            graded_at TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_assignment ON submissions(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gradebook_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            term INTEGER NOT NULL,
            total_marks REAL NOT NULL DEFAULT 0,
            final_grade TEXT,
            remarks TEXT,
            UNIQUE(student_id, class_id, subject_id, academic_year, term),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gradebook_entries_class ON gradebook_entries(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gradebook_entries_student ON gradebook_entries(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gradebook_assignments(
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL,
            assignment_id TEXT,
            marks REAL NOT NULL DEFAULT 0,
            weight REAL,
            feedback TEXT,
            FOREIGN KEY(entry_id) REFERENCES gradebook_entries(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gradebook_assignments_entry ON gradebook_assignments(entry_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gradebook_tests(
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL,
            name TEXT NOT NULL,
            marks REAL NOT NULL DEFAULT 0,
            test_date TEXT,
            weight REAL,
            FOREIGN KEY(entry_id) REFERENCES gradebook_entries(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gradebook_tests_entry ON gradebook_tests(entry_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gradebook_exams(
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL,
            name TEXT NOT NULL,
            marks REAL NOT NULL DEFAULT 0,
            exam_date TEXT,
            weight REAL,
            FOREIGN KEY(entry_id) REFERENCES gradebook_entries(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gradebook_exams_entry ON gradebook_exams(entry_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gradebook_rubrics(
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL,
            criteria TEXT NOT NULL,
            marks REAL NOT NULL DEFAULT 0,
            comment TEXT,
            FOREIGN KEY(entry_id) REFERENCES gradebook_entries(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gradebook_rubrics_entry ON gradebook_rubrics(entry_id)",
        [],
    )?;

    Ok(conn)
}
