//! List helpers.
//!
//! Lists are plain `VecDeque<Bytes>`; the functions here hold the index
//! arithmetic and scanning loops the list commands share.

use std::collections::VecDeque;

use bytes::Bytes;

/// Resolves an inclusive (start, stop) pair with negative-from-the-end
/// semantics into concrete bounds, or `None` when the range misses the list
/// entirely.
pub fn resolve_range(length: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let length = length as i64;
    if length == 0 {
        return None;
    }

    let mut from = if start < 0 { length + start } else { start };
    let mut to = if stop < 0 { length + stop } else { stop };

    if from < 0 {
        from = 0;
    }
    if to >= length {
        to = length - 1;
    }
    if from > to || from >= length || to < 0 {
        return None;
    }

    Some((from as usize, to as usize))
}

/// Resolves a single possibly-negative index.
pub fn resolve_index(length: usize, index: i64) -> Option<usize> {
    let length = length as i64;
    let resolved = if index < 0 { length + index } else { index };
    if resolved < 0 || resolved >= length {
        return None;
    }
    Some(resolved as usize)
}

/// LREM: count > 0 removes from the head, count < 0 from the tail, zero
/// removes all occurrences. Returns how many were removed.
pub fn remove_occurrences(list: &mut VecDeque<Bytes>, count: i64, element: &[u8]) -> usize {
    let limit = if count == 0 {
        usize::MAX
    } else {
        count.unsigned_abs() as usize
    };

    let mut removed = 0;

    if count >= 0 {
        let mut index = 0;
        while index < list.len() && removed < limit {
            if list[index] == element {
                list.remove(index);
                removed += 1;
            } else {
                index += 1;
            }
        }
    } else {
        let mut index = list.len();
        while index > 0 && removed < limit {
            index -= 1;
            if list[index] == element {
                list.remove(index);
                removed += 1;
            }
        }
    }

    removed
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertPosition {
    Before,
    After,
}

/// LINSERT. Returns the new length, or `None` when the pivot is absent.
pub fn insert_relative(
    list: &mut VecDeque<Bytes>,
    position: InsertPosition,
    pivot: &[u8],
    element: Bytes,
) -> Option<usize> {
    let pivot_index = list.iter().position(|item| item == pivot)?;
    let insert_at = match position {
        InsertPosition::Before => pivot_index,
        InsertPosition::After => pivot_index + 1,
    };
    list.insert(insert_at, element);
    Some(list.len())
}

/// LPOS with RANK/COUNT semantics. A negative rank searches from the tail.
/// `count` of zero means "all matches".
pub fn find_positions(
    list: &VecDeque<Bytes>,
    element: &[u8],
    rank: i64,
    count: Option<u64>,
) -> Vec<usize> {
    let wanted = match count {
        Some(0) => usize::MAX,
        Some(n) => n as usize,
        None => 1,
    };

    let mut skips = rank.unsigned_abs().saturating_sub(1);
    let mut matches = Vec::new();

    let indices: Box<dyn Iterator<Item = usize>> = if rank >= 0 {
        Box::new(0..list.len())
    } else {
        Box::new((0..list.len()).rev())
    };

    for index in indices {
        if list[index] != element {
            continue;
        }
        if skips > 0 {
            skips -= 1;
            continue;
        }
        matches.push(index);
        if matches.len() >= wanted {
            break;
        }
    }

    matches
}

/// LTRIM keeps only the inclusive range, in place.
pub fn trim_to_range(list: &mut VecDeque<Bytes>, start: i64, stop: i64) {
    match resolve_range(list.len(), start, stop) {
        Some((from, to)) => {
            list.drain(to + 1..);
            list.drain(..from);
        }
        None => list.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(items: &[&str]) -> VecDeque<Bytes> {
        items
            .iter()
            .map(|item| Bytes::copy_from_slice(item.as_bytes()))
            .collect()
    }

    #[test]
    fn test_resolve_range() {
        let test_cases = vec![
            (5, 0, -1, Some((0, 4))),
            (5, 1, 3, Some((1, 3))),
            (5, -3, -1, Some((2, 4))),
            (5, -100, 100, Some((0, 4))),
            (5, 3, 1, None),
            (5, 5, 10, None),
            (0, 0, -1, None),
        ];

        for (length, start, stop, expected) in test_cases {
            assert_eq!(
                resolve_range(length, start, stop),
                expected,
                "range {}..{} over {}",
                start,
                stop,
                length
            );
        }
    }

    #[test]
    fn test_remove_occurrences_directions() {
        let mut from_head = list_of(&["a", "b", "a", "c", "a"]);
        assert_eq!(remove_occurrences(&mut from_head, 2, b"a"), 2);
        assert_eq!(from_head, list_of(&["b", "c", "a"]));

        let mut from_tail = list_of(&["a", "b", "a", "c", "a"]);
        assert_eq!(remove_occurrences(&mut from_tail, -2, b"a"), 2);
        assert_eq!(from_tail, list_of(&["a", "b", "c"]));

        let mut all = list_of(&["a", "b", "a"]);
        assert_eq!(remove_occurrences(&mut all, 0, b"a"), 2);
        assert_eq!(all, list_of(&["b"]));
    }

    #[test]
    fn test_insert_relative() {
        let mut list = list_of(&["a", "c"]);
        assert_eq!(
            insert_relative(&mut list, InsertPosition::Before, b"c", Bytes::from("b")),
            Some(3)
        );
        assert_eq!(list, list_of(&["a", "b", "c"]));

        assert_eq!(
            insert_relative(&mut list, InsertPosition::After, b"c", Bytes::from("d")),
            Some(4)
        );
        assert_eq!(list, list_of(&["a", "b", "c", "d"]));

        assert_eq!(
            insert_relative(&mut list, InsertPosition::Before, b"x", Bytes::from("y")),
            None
        );
    }

    #[test]
    fn test_find_positions() {
        let list = list_of(&["a", "b", "c", "1", "2", "3", "c", "c"]);

        assert_eq!(find_positions(&list, b"c", 1, None), vec![2]);
        assert_eq!(find_positions(&list, b"c", -1, None), vec![7]);
        assert_eq!(find_positions(&list, b"c", 2, Some(0)), vec![6, 7]);
        assert_eq!(find_positions(&list, b"c", -1, Some(2)), vec![7, 6]);
        assert_eq!(find_positions(&list, b"x", 1, None), Vec::<usize>::new());
    }

    #[test]
    fn test_trim_to_range() {
        let mut list = list_of(&["a", "b", "c", "d", "e"]);
        trim_to_range(&mut list, 1, 3);
        assert_eq!(list, list_of(&["b", "c", "d"]));

        let mut emptied = list_of(&["a", "b"]);
        trim_to_range(&mut emptied, 5, 10);
        assert!(emptied.is_empty());
    }
}
