use std::time::{Duration, SystemTime};

use chrono::DateTime;

use crate::state::ConversationState;

/// Kernel caching tiers. Entry and attribute TTLs are chosen per node from
/// this table; immutable nodes never advertise anything shorter than
/// [`TTL_IMMUTABLE`].
pub const TTL_STATIC: Duration = Duration::from_secs(3600);
pub const TTL_MODELS: Duration = Duration::from_secs(300);
pub const TTL_CONV_STRUCT: Duration = Duration::from_secs(10);
pub const TTL_IMMUTABLE: Duration = Duration::from_secs(3600);
pub const TTL_VOLATILE: Duration = Duration::from_secs(1);

/// What the kernel is told about a node, before fuser-specific packaging.
#[derive(Debug, Clone)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub entry_ttl: Duration,
    pub attr_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
}

/// atime/mtime/ctime for one node, resolved by the timestamp policy.
#[derive(Debug, Clone, Copy)]
pub struct Times {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

fn parse_rfc3339(s: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc3339(s).ok().map(SystemTime::from)
}

/// Remote timestamps win; a locally allocated instant is next; the mount
/// start time is the floor.
pub fn resolve_times(
    remote_created_at: Option<&str>,
    remote_updated_at: Option<&str>,
    local_created_at: Option<SystemTime>,
    start_time: SystemTime,
) -> Times {
    let created = remote_created_at.and_then(parse_rfc3339);
    let updated = remote_updated_at.and_then(parse_rfc3339);
    if created.is_some() || updated.is_some() {
        let ctime = created.or(updated).unwrap_or(start_time);
        let mtime = updated.or(created).unwrap_or(start_time);
        return Times {
            atime: mtime,
            mtime,
            ctime,
        };
    }
    let t = local_created_at.unwrap_or(start_time);
    Times {
        atime: t,
        mtime: t,
        ctime: t,
    }
}

pub fn conversation_times(state: &ConversationState, start_time: SystemTime) -> Times {
    resolve_times(
        state.remote_created_at.as_deref(),
        state.remote_updated_at.as_deref(),
        Some(SystemTime::from(state.local_created_at)),
        start_time,
    )
}

/// A message carries a single `created_at`; it stands in for all three stamps.
pub fn message_times(created_at: Option<&str>, start_time: SystemTime) -> Times {
    resolve_times(created_at, created_at, None, start_time)
}

pub fn static_times(start_time: SystemTime) -> Times {
    Times {
        atime: start_time,
        mtime: start_time,
        ctime: start_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn epoch_plus(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn remote_stamps_take_precedence() {
        let times = resolve_times(
            Some("2024-01-15T10:30:00Z"),
            Some("2024-01-16T14:20:00Z"),
            Some(epoch_plus(5)),
            epoch_plus(0),
        );
        assert_eq!(times.ctime, parse_rfc3339("2024-01-15T10:30:00Z").unwrap());
        assert_eq!(times.mtime, parse_rfc3339("2024-01-16T14:20:00Z").unwrap());
        assert_eq!(times.atime, times.mtime);
    }

    #[test]
    fn lone_created_at_covers_all_stamps() {
        let times = resolve_times(Some("2024-01-15T10:30:00Z"), None, None, epoch_plus(0));
        assert_eq!(times.ctime, times.mtime);
        assert_eq!(times.atime, times.mtime);
    }

    #[test]
    fn local_fallback_then_start_time() {
        let local = epoch_plus(42);
        let times = resolve_times(None, None, Some(local), epoch_plus(0));
        assert_eq!(times.mtime, local);

        let times = resolve_times(None, None, None, epoch_plus(7));
        assert_eq!(times.mtime, epoch_plus(7));
    }

    #[test]
    fn unparseable_remote_stamp_falls_back() {
        let times = resolve_times(Some("not a date"), None, None, epoch_plus(9));
        assert_eq!(times.mtime, epoch_plus(9));
    }

    #[test]
    fn conversation_times_use_local_allocation_before_first_send() {
        let state = ConversationState {
            local_id: "ab12cd34".into(),
            remote_id: String::new(),
            slug: String::new(),
            model_display: String::new(),
            model_internal: String::new(),
            cwd: String::new(),
            created: false,
            local_created_at: Utc::now(),
            remote_created_at: None,
            remote_updated_at: None,
        };
        let times = conversation_times(&state, epoch_plus(0));
        assert_eq!(times.mtime, SystemTime::from(state.local_created_at));
    }
}
