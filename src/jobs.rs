//! Fulfillment run lifecycle.
//!
//! A run record doubles as the queue entry: the API inserts it `queued`
//! under a duplicate-run guard, the worker reserves it with
//! `FOR UPDATE SKIP LOCKED`, and per-format columns track rendering progress
//! for pollers. Runs are never deleted; re-triggering after completion
//! creates a new run id.

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::error::FulfillmentError;
use crate::models::{FulfillmentJob, MessageGroup, NewFulfillmentJob};
use crate::schema::fulfillment_jobs;

pub const RUN_QUEUED: &str = "queued";
pub const RUN_RENDERING: &str = "rendering";
pub const RUN_DONE: &str = "done";
pub const RUN_FAILED: &str = "failed";

pub const FORMAT_NOT_REQUESTED: &str = "not_requested";
pub const FORMAT_QUEUED: &str = "queued";
pub const FORMAT_RENDERING: &str = "rendering";
pub const FORMAT_DONE: &str = "done";
pub const FORMAT_FAILED: &str = "failed";

pub const ORDER_SUBMISSION: &str = "submission";
pub const ORDER_ALPHABETICAL: &str = "alphabetical";

/// Slug of the virtual all-time aggregate. Listings may use it; fulfillment
/// of it is undefined.
pub const ALL_TIME_SLUG: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Deck,
    Document,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "csv" => Some(Self::Csv),
            "deck" => Some(Self::Deck),
            "document" => Some(Self::Document),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Deck => "deck",
            Self::Document => "document",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

pub struct TriggerOutcome {
    pub job: FulfillmentJob,
    /// False when an active run already existed and its handle was returned.
    pub created: bool,
}

/// Starts a run for a group, or returns the already-active run. The guard is
/// transactional and backed by a partial unique index, so two rapid triggers
/// yield exactly one new run.
pub fn trigger_run(
    conn: &mut PgConnection,
    group: &MessageGroup,
    include_deck: bool,
    ordering: &str,
) -> Result<TriggerOutcome, FulfillmentError> {
    if group.slug == ALL_TIME_SLUG {
        return Err(FulfillmentError::InvalidTarget(
            "bulk export is undefined for the all-time aggregate".to_string(),
        ));
    }
    if ordering != ORDER_SUBMISSION && ordering != ORDER_ALPHABETICAL {
        return Err(FulfillmentError::InvalidTarget(format!(
            "unknown ordering mode {ordering}"
        )));
    }

    let outcome = conn.transaction(|conn| {
        if let Some(active) = find_active_run(conn, group.id)? {
            return Ok(TriggerOutcome {
                job: active,
                created: false,
            });
        }

        let format_status = |requested: bool| {
            if requested {
                FORMAT_QUEUED
            } else {
                FORMAT_NOT_REQUESTED
            }
        };

        let new_job = NewFulfillmentJob {
            id: Uuid::new_v4(),
            message_group_id: group.id,
            ordering: ordering.to_string(),
            include_deck,
            status: RUN_QUEUED.to_string(),
            csv_status: FORMAT_QUEUED.to_string(),
            deck_status: format_status(include_deck).to_string(),
            doc_status: format_status(include_deck).to_string(),
        };

        match diesel::insert_into(fulfillment_jobs::table)
            .values(&new_job)
            .execute(conn)
        {
            Ok(_) => {}
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => {
                // Lost the race against a concurrent trigger; the aborted
                // transaction cannot run further queries, so the winning run
                // is fetched after rollback.
                return Err(FulfillmentError::AlreadyRunning);
            }
            Err(err) => return Err(err.into()),
        }

        let job = fulfillment_jobs::table.find(new_job.id).first(conn)?;
        Ok(TriggerOutcome { job, created: true })
    });

    match outcome {
        Err(FulfillmentError::AlreadyRunning) => {
            let active = fulfillment_jobs::table
                .filter(fulfillment_jobs::message_group_id.eq(group.id))
                .filter(fulfillment_jobs::status.eq_any([RUN_QUEUED, RUN_RENDERING]))
                .first(conn)
                .optional()?
                .ok_or(FulfillmentError::AlreadyRunning)?;
            Ok(TriggerOutcome {
                job: active,
                created: false,
            })
        }
        other => other,
    }
}

fn find_active_run(
    conn: &mut PgConnection,
    message_group_id: Uuid,
) -> QueryResult<Option<FulfillmentJob>> {
    fulfillment_jobs::table
        .filter(fulfillment_jobs::message_group_id.eq(message_group_id))
        .filter(fulfillment_jobs::status.eq_any([RUN_QUEUED, RUN_RENDERING]))
        .for_update()
        .first(conn)
        .optional()
}

/// Claims the oldest queued run for the worker.
pub fn reserve_run(conn: &mut PgConnection) -> JobQueueResult<Option<FulfillmentJob>> {
    conn.transaction(|conn| {
        let job_opt = fulfillment_jobs::table
            .filter(fulfillment_jobs::status.eq(RUN_QUEUED))
            .order(fulfillment_jobs::created_at.asc())
            .for_update()
            .skip_locked()
            .first::<FulfillmentJob>(conn)
            .optional()?;

        if let Some(job) = job_opt {
            diesel::update(fulfillment_jobs::table.find(job.id))
                .set((
                    fulfillment_jobs::status.eq(RUN_RENDERING),
                    fulfillment_jobs::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;

            let refreshed = fulfillment_jobs::table.find(job.id).first(conn)?;
            Ok::<Option<FulfillmentJob>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<FulfillmentJob>, diesel::result::Error>(None)
        }
    })
    .map_err(JobQueueError::from)
}

pub fn set_format_status(
    conn: &mut PgConnection,
    job_id: Uuid,
    format: ExportFormat,
    status: &str,
    error: Option<&str>,
) -> JobQueueResult<()> {
    let now = Utc::now().naive_utc();
    let update = diesel::update(fulfillment_jobs::table.find(job_id));

    match format {
        ExportFormat::Csv => update
            .set((
                fulfillment_jobs::csv_status.eq(status),
                fulfillment_jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        ExportFormat::Deck => update
            .set((
                fulfillment_jobs::deck_status.eq(status),
                fulfillment_jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        ExportFormat::Document => update
            .set((
                fulfillment_jobs::doc_status.eq(status),
                fulfillment_jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
    };

    if let Some(error) = error {
        diesel::update(fulfillment_jobs::table.find(job_id))
            .set(fulfillment_jobs::last_error.eq(error))
            .execute(conn)?;
    }

    Ok(())
}

pub fn set_deck_progress(
    conn: &mut PgConnection,
    job_id: Uuid,
    percent: i32,
) -> JobQueueResult<()> {
    diesel::update(fulfillment_jobs::table.find(job_id))
        .set((
            fulfillment_jobs::deck_progress.eq(percent.clamp(0, 100)),
            fulfillment_jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Derives the run status from its per-format columns: failed if any
/// requested format failed, done when all requested formats are done.
/// Formats that completed before a later failure stay downloadable.
pub fn finalize_run(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<FulfillmentJob> {
    let job: FulfillmentJob = fulfillment_jobs::table.find(job_id).first(conn)?;

    let requested: Vec<&str> = [&job.csv_status, &job.deck_status, &job.doc_status]
        .into_iter()
        .map(String::as_str)
        .filter(|status| *status != FORMAT_NOT_REQUESTED)
        .collect();

    let overall = if requested.iter().any(|status| *status == FORMAT_FAILED) {
        RUN_FAILED
    } else if requested.iter().all(|status| *status == FORMAT_DONE) {
        RUN_DONE
    } else {
        RUN_RENDERING
    };

    diesel::update(fulfillment_jobs::table.find(job_id))
        .set((
            fulfillment_jobs::status.eq(overall),
            fulfillment_jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    let refreshed = fulfillment_jobs::table.find(job_id).first(conn)?;
    Ok(refreshed)
}

/// Marks a run failed outright, for errors that precede any rendering.
pub fn fail_run(conn: &mut PgConnection, job_id: Uuid, error: &str) -> JobQueueResult<()> {
    diesel::update(fulfillment_jobs::table.find(job_id))
        .set((
            fulfillment_jobs::status.eq(RUN_FAILED),
            fulfillment_jobs::last_error.eq(error),
            fulfillment_jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn find_run(conn: &mut PgConnection, job_id: Uuid) -> QueryResult<Option<FulfillmentJob>> {
    fulfillment_jobs::table.find(job_id).first(conn).optional()
}

pub fn list_runs(
    conn: &mut PgConnection,
    message_group_id: Uuid,
) -> QueryResult<Vec<FulfillmentJob>> {
    fulfillment_jobs::table
        .filter(fulfillment_jobs::message_group_id.eq(message_group_id))
        .order(fulfillment_jobs::created_at.desc())
        .load(conn)
}
