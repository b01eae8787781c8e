use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_selection_indexes")
        .depends_on(&["0001_initial_schema"])
        // Stale-tile and stale-listing selection scans oldest first
        .operation(AddIndex::new(
            "grid_tiles",
            Index::new("idx_grid_tiles_scanned_at").column("scanned_at"),
        ))
        .operation(AddIndex::new(
            "listings",
            Index::new("idx_listings_calendar_updated").column("calendar_updated_at"),
        ))
        .operation(AddIndex::new(
            "listings",
            Index::new("idx_listings_details_updated").column("details_updated_at"),
        ))
        .operation(AddIndex::new(
            "listings",
            Index::new("idx_listings_reviews_updated").column("reviews_updated_at"),
        ))
        .operation(AddIndex::new(
            "listings",
            Index::new("idx_listings_booking_updated").column("booking_updated_at"),
        ))
        .operation(AddIndex::new(
            "responses",
            Index::new("idx_responses_task").column("task_id"),
        ))
        // Worker polling and in-flight dedup
        .operation(AddIndex::new(
            "tasks",
            Index::new("idx_tasks_ready")
                .column("status")
                .column("priority")
                .column("submitted_at"),
        ))
        .operation(AddIndex::new(
            "tasks",
            Index::new("idx_tasks_operation_status")
                .column("operation")
                .column("status"),
        ))
        .operation(AddIndex::new(
            "tasks",
            Index::new("idx_tasks_group").column("group_id"),
        ))
}
