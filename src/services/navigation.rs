//! Chapter navigation
//!
//! Moves from an episode to its neighbour within the same work, stepping
//! over hidden or deleted chapters, then opens the target through the
//! access gate with the usual charge rules.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;

use crate::db::{episodes, CoreDb, Episode, EpisodeStatus};
use crate::error::{CoreError, Result};

use super::access_gate::{AccessGate, ContentView, Viewer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

impl Direction {
    fn step(self) -> i64 {
        match self {
            Direction::Next => 1,
            Direction::Prev => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Next => write!(f, "next"),
            Direction::Prev => write!(f, "prev"),
        }
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "next" => Ok(Direction::Next),
            "prev" | "previous" => Ok(Direction::Prev),
            other => Err(CoreError::InvalidInput(format!("unknown direction '{}'", other))),
        }
    }
}

/// Nearest active sibling of `from` in `direction`.
///
/// Chapters are walked one ordinal at a time; a missing ordinal or one
/// below 1 ends the walk.
pub fn find_adjacent(conn: &Connection, from: &Episode, direction: Direction) -> Result<Episode> {
    let mut chapter = from.chapter;
    loop {
        chapter += direction.step();
        if chapter < 1 {
            return Err(CoreError::OutOfRange(format!("episode {} is the first chapter", from.id)));
        }

        let sibling = episodes::find_by_chapter(conn, from.work_id, chapter)?.ok_or_else(|| {
            CoreError::OutOfRange(format!("no {} chapter after episode {}", direction, from.id))
        })?;

        if sibling.status == EpisodeStatus::Active {
            return Ok(sibling);
        }
        debug!(work_id = from.work_id, chapter, status = %sibling.status, "Skipping inactive chapter");
    }
}

pub struct Navigator {
    db: Arc<CoreDb>,
    gate: Arc<AccessGate>,
}

impl Navigator {
    pub fn new(db: Arc<CoreDb>, gate: Arc<AccessGate>) -> Self {
        Self { db, gate }
    }

    /// Open the neighbouring active episode
    pub fn adjacent_episode(&self, viewer: &Viewer, episode_id: i64, direction: Direction) -> Result<ContentView> {
        let target = self.db.with_conn(|conn| {
            let current = episodes::get_episode(conn, episode_id)?
                .ok_or_else(|| CoreError::NotFound(format!("episode {}", episode_id)))?;
            find_adjacent(conn, &current, direction)
        })?;

        self.gate.open_resolved(viewer, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ViewBuffer;
    use crate::db::episodes::{create_episode, create_work, NewEpisode};
    use crate::services::events::EventBus;

    /// Work with chapters 1..=5; chapters 2 and 4 hidden/deleted
    fn setup() -> (Navigator, Vec<i64>) {
        let db = Arc::new(CoreDb::open_in_memory().unwrap());
        let ids = db
            .with_conn(|conn| {
                let work = create_work(conn, "W", "a")?;
                let mut ids = vec![];
                for chapter in 1..=5 {
                    let status = match chapter {
                        2 => EpisodeStatus::Hidden,
                        4 => EpisodeStatus::Deleted,
                        _ => EpisodeStatus::Active,
                    };
                    ids.push(create_episode(conn, &NewEpisode {
                        work_id: work.id,
                        chapter,
                        title: format!("Ch {}", chapter),
                        content: String::new(),
                        status,
                        coin_cost: 0,
                    })?.id);
                }
                Ok(ids)
            })
            .unwrap();

        let events = Arc::new(EventBus::new());
        let gate = Arc::new(AccessGate::new(db.clone(), Arc::new(ViewBuffer::new()), events));
        (Navigator::new(db, gate), ids)
    }

    #[test]
    fn test_next_skips_inactive() {
        let (nav, ids) = setup();
        let view = nav.adjacent_episode(&Viewer::Anonymous, ids[0], Direction::Next).unwrap();
        assert_eq!(view.chapter, 3);
        let view = nav.adjacent_episode(&Viewer::Anonymous, ids[2], Direction::Next).unwrap();
        assert_eq!(view.chapter, 5);
    }

    #[test]
    fn test_prev_walks_backward() {
        let (nav, ids) = setup();
        let view = nav.adjacent_episode(&Viewer::Anonymous, ids[4], Direction::Prev).unwrap();
        assert_eq!(view.chapter, 3);
        let view = nav.adjacent_episode(&Viewer::Anonymous, ids[2], Direction::Prev).unwrap();
        assert_eq!(view.chapter, 1);
    }

    #[test]
    fn test_out_of_range_at_both_ends() {
        let (nav, ids) = setup();
        assert!(matches!(
            nav.adjacent_episode(&Viewer::Anonymous, ids[0], Direction::Prev),
            Err(CoreError::OutOfRange(_))
        ));
        assert!(matches!(
            nav.adjacent_episode(&Viewer::Anonymous, ids[4], Direction::Next),
            Err(CoreError::OutOfRange(_))
        ));
        assert!(matches!(
            nav.adjacent_episode(&Viewer::Anonymous, 999, Direction::Next),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("NEXT".parse::<Direction>().unwrap(), Direction::Next);
        assert_eq!("previous".parse::<Direction>().unwrap(), Direction::Prev);
        assert!("up".parse::<Direction>().is_err());
    }
}
