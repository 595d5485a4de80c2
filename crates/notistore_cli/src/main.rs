//! CLI inspection entry point.
//!
//! # Responsibility
//! - Print the unopened index of one target from a store file.
//! - Show member and distinct-notifier counts per group owner.
//!
//! Usage: `notistore_cli <db-path> <target-type> <target-id>`
//!
//! Logs go to `NOTISTORE_LOG_DIR` (absolute) when it is set; without it
//! the CLI only prints to stdout/stderr.

use log::error;
use notistore_core::{
    default_log_level, init_logging, open_db_with_busy_timeout, CountState, EntityRef,
    LoggingError, NotificationQuery, NotificationService, SqliteNotificationRepository,
    StoreConfig,
};
use std::error::Error;
use std::process::ExitCode;

const LOG_DIR_ENV: &str = "NOTISTORE_LOG_DIR";

fn main() -> ExitCode {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let [db_path, target_type, target_id] = args.as_slice() else {
        eprintln!("usage: notistore_cli <db-path> <target-type> <target-id>");
        return ExitCode::from(2);
    };

    let log_dir = std::env::var(LOG_DIR_ENV).ok();
    if let Err(err) = start_logging(log_dir.as_deref()) {
        eprintln!("notistore_cli: logging disabled: {err}");
    }

    match run(db_path, target_type, target_id) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={}", err);
            eprintln!("notistore_cli: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether a logger was started.
fn start_logging(log_dir: Option<&str>) -> Result<bool, LoggingError> {
    match log_dir {
        Some(dir) => init_logging(default_log_level(), dir).map(|()| true),
        None => Ok(false),
    }
}

fn run(db_path: &str, target_type: &str, target_id: &str) -> Result<(), Box<dyn Error>> {
    let target = EntityRef::new(target_type, target_id)?;
    let config = StoreConfig::default();
    let conn = open_db_with_busy_timeout(db_path, config.busy_timeout())?;
    let repo = SqliteNotificationRepository::try_new(&conn)?;
    let service = NotificationService::with_config(repo, config)?;

    let query = NotificationQuery::unopened_index(false, false).filtered_by_target(&target);
    let owners = service.index(&query)?;
    println!(
        "notistore_core version={} target={} unopened_groups={}",
        notistore_core::core_version(),
        target,
        owners.len()
    );

    let mut cache = service.aggregate_cache();
    cache.prime(&owners);
    for owner in &owners {
        let members = cache.member_count(owner.id, CountState::Unopened, None)?;
        let notifiers = cache.distinct_notifier_count(owner.id, CountState::Unopened, None)?;
        println!(
            "id={} key={} notifiable={} created_at={} members={} other_notifiers={}",
            owner.id, owner.key, owner.notifiable, owner.created_at, members, notifiers
        );
    }
    Ok(())
}
