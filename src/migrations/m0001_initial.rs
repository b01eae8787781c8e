use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        // grid_tiles - leaves of the discovery quadtree
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS grid_tiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    quadkey TEXT NOT NULL UNIQUE,
    tile_x INTEGER NOT NULL,
    tile_y INTEGER NOT NULL,
    tile_z INTEGER NOT NULL,
    west REAL NOT NULL,
    south REAL NOT NULL,
    east REAL NOT NULL,
    north REAL NOT NULL,
    width_m REAL NOT NULL,
    height_m REAL NOT NULL,
    estimated_count INTEGER NOT NULL DEFAULT -1,
    count_updated_at TEXT,
    scanned_at TEXT,
    created_at TEXT NOT NULL
)"#,
        ))
        // listings - id is the vendor's listing id
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    calendar_updated_at TEXT,
    details_updated_at TEXT,
    reviews_updated_at TEXT,
    booking_updated_at TEXT,
    relocations TEXT NOT NULL DEFAULT '[]'
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    response_type TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    payload TEXT NOT NULL,
    url TEXT NOT NULL,
    query TEXT NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    task_id TEXT,
    listing_id INTEGER,
    created_at TEXT NOT NULL
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS aois (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    geometry TEXT NOT NULL,
    west REAL NOT NULL,
    south REAL NOT NULL,
    east REAL NOT NULL,
    north REAL NOT NULL,
    collect_calendars INTEGER NOT NULL DEFAULT 1,
    collect_reviews INTEGER NOT NULL DEFAULT 1,
    collect_details INTEGER NOT NULL DEFAULT 1,
    collect_booking_quotes INTEGER NOT NULL DEFAULT 1,
    scan_for_new_listings INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
)"#,
        ))
        .operation(
            CreateTable::new("task_groups")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(Field::new("operation", FieldType::Text).not_null())
                .add_field(Field::new("args", FieldType::Text).not_null())
                .add_field(Field::new("created_at", FieldType::Text).not_null()),
        )
        .operation(
            CreateTable::new("tasks")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(Field::new("operation", FieldType::Text).not_null())
                .add_field(Field::new("kwargs", FieldType::Text).not_null())
                .add_field(Field::new("status", FieldType::Text).not_null().default("'submitted'"))
                .add_field(Field::new("priority", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("group_id", FieldType::Text).references("task_groups", "id"))
                .add_field(Field::new("parent_id", FieldType::Text))
                .add_field(Field::new("retries", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("max_retries", FieldType::Integer).not_null().default("2"))
                .add_field(Field::new("eta", FieldType::Text))
                .add_field(Field::new("expires_at", FieldType::Text))
                .add_field(Field::new("submitted_at", FieldType::Text).not_null())
                .add_field(Field::new("started_at", FieldType::Text))
                .add_field(Field::new("finished_at", FieldType::Text))
                .add_field(Field::new("result", FieldType::Text))
                .add_field(Field::new("error", FieldType::Text)),
        )
}
