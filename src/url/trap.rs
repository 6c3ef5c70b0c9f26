//! Spider-trap detection on URL paths
//!
//! Crawler traps (infinite calendars, relative-link loops, session paths) show
//! up as structurally repetitive or absurdly deep paths. Two signatures are
//! rejected:
//! - the same segment three or more times in a row (`/a/a/a`)
//! - the same run of two or more segments twice in a row (`/a/b/a/b`)

/// Minimum consecutive repetitions of a single segment that count as a trap
const SINGLE_SEGMENT_REPEATS: usize = 3;

/// Returns the non-empty segments of a URL path
fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Checks whether a path looks like a spider trap
///
/// # Arguments
///
/// * `path` - The URL path (e.g. `/calendar/2026/01/01`)
/// * `max_segments` - Paths deeper than this are rejected outright
///
/// # Examples
///
/// ```
/// use sumi_fleet::url::is_spider_trap;
///
/// assert!(is_spider_trap("/a/b/a/b", 5));
/// assert!(is_spider_trap("/1/2/3/4/5/6", 5));
/// assert!(!is_spider_trap("/normal/page", 5));
/// ```
pub fn is_spider_trap(path: &str, max_segments: u32) -> bool {
    let segs = segments(path);

    if segs.len() > max_segments as usize {
        return true;
    }

    has_repeated_segment(&segs) || has_repeated_sequence(&segs)
}

fn has_repeated_segment(segs: &[&str]) -> bool {
    let mut run = 1;
    for pair in segs.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            if run >= SINGLE_SEGMENT_REPEATS {
                return true;
            }
        } else {
            run = 1;
        }
    }
    false
}

fn has_repeated_sequence(segs: &[&str]) -> bool {
    let n = segs.len();
    for len in 2..=n / 2 {
        for start in 0..=n - 2 * len {
            if segs[start..start + len] == segs[start + len..start + 2 * len] {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_trap() {
        assert!(is_spider_trap("/calendar/2026/01/01/calendar/2026/01/01", 20));
        assert!(is_spider_trap("/calendar/2026/01/01/calendar/2026/01/01", 5));
    }

    #[test]
    fn test_short_repeated_sequence() {
        assert!(is_spider_trap("/a/b/a/b", 5));
        assert!(is_spider_trap("/x/a/b/c/a/b/c", 10));
    }

    #[test]
    fn test_single_segment_runs() {
        assert!(is_spider_trap("/users/users/users", 5));
        assert!(!is_spider_trap("/users/users", 5));
    }

    #[test]
    fn test_depth_limit() {
        assert!(is_spider_trap("/1/2/3/4/5/6", 5));
        assert!(!is_spider_trap("/1/2/3", 5));
        assert!(!is_spider_trap("/1/2/3/4/5/", 5));
    }

    #[test]
    fn test_normal_paths() {
        assert!(!is_spider_trap("/normal/page", 5));
        assert!(!is_spider_trap("/", 5));
        assert!(!is_spider_trap("", 5));
        assert!(!is_spider_trap("/blog/2026/01/post", 5));
    }
}
