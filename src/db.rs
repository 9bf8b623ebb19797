use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "learnhub.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            role TEXT NOT NULL DEFAULT 'student',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(owner_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_owner ON lessons(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_configs(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL UNIQUE,
            grading_type TEXT NOT NULL DEFAULT 'percentage',
            total_points REAL NOT NULL DEFAULT 100,
            passing_grade TEXT,
            passing_percentage REAL NOT NULL DEFAULT 60,
            show_letter_grade INTEGER NOT NULL DEFAULT 1,
            show_percentage INTEGER NOT NULL DEFAULT 1,
            show_points INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Scale bands replace the serialized grading_scale column; position keeps authoring order.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_scale_bands(
            config_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            letter TEXT NOT NULL,
            min_percentage REAL NOT NULL,
            max_percentage REAL NOT NULL,
            gpa REAL NOT NULL,
            PRIMARY KEY(config_id, position),
            UNIQUE(config_id, letter),
            FOREIGN KEY(config_id) REFERENCES grade_configs(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_categories(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            weight REAL NOT NULL,
            total_points REAL,
            is_published INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_categories_lesson ON grade_categories(lesson_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_items(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            item_type TEXT NOT NULL DEFAULT 'assignment',
            points_possible REAL NOT NULL,
            due_date TEXT,
            is_published INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE,
            FOREIGN KEY(category_id) REFERENCES grade_categories(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_items_category ON grade_items(category_id, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_items_lesson ON grade_items(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_entries(
            id TEXT PRIMARY KEY,
            grade_item_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            score REAL,
            raw_score REAL,
            status TEXT NOT NULL DEFAULT 'pending',
            comments TEXT,
            graded_by TEXT,
            graded_at TEXT,
            is_late INTEGER NOT NULL DEFAULT 0,
            late_penalty REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(grade_item_id, user_id),
            FOREIGN KEY(grade_item_id) REFERENCES grade_items(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_user ON grade_entries(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_summaries(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            percentage REAL NOT NULL,
            letter_grade TEXT NOT NULL,
            gpa REAL NOT NULL,
            is_passing INTEGER NOT NULL,
            earned_points REAL NOT NULL,
            possible_points REAL NOT NULL,
            remaining_points REAL NOT NULL,
            calculated_at TEXT NOT NULL,
            UNIQUE(lesson_id, user_id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // One row per letter; replaces the serialized points_to_next_grade map.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_summary_goals(
            summary_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            letter TEXT NOT NULL,
            target_percentage REAL NOT NULL,
            points_needed REAL NOT NULL,
            percentage_needed REAL,
            achievable INTEGER NOT NULL,
            already_achieved INTEGER NOT NULL,
            PRIMARY KEY(summary_id, letter),
            FOREIGN KEY(summary_id) REFERENCES grade_summaries(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pomodoro_sessions(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            lesson_id TEXT,
            phase TEXT NOT NULL,
            status TEXT NOT NULL,
            planned_minutes INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            last_resumed_at TEXT,
            paused_at TEXT,
            elapsed_seconds INTEGER NOT NULL DEFAULT 0,
            ended_at TEXT,
            notes TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pomodoro_sessions_user ON pomodoro_sessions(user_id, started_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pomodoro_interruptions(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES pomodoro_sessions(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pomodoro_interruptions_session ON pomodoro_interruptions(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            lesson_id TEXT,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_user_lesson ON notes(user_id, lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            lesson_id TEXT,
            title TEXT NOT NULL,
            description TEXT,
            due_date TEXT,
            priority TEXT NOT NULL DEFAULT 'medium',
            status TEXT NOT NULL DEFAULT 'todo',
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_user_status ON tasks(user_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE,
            FOREIGN KEY(author_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_lesson ON announcements(lesson_id, created_at)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute("PRAGMA foreign_keys = ON", [])
        .expect("enable foreign keys");
    init_schema(&conn).expect("init schema");
    conn
}
