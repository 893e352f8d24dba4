//! Classification of [`CommandComplete`][super::backend::CommandComplete] tags.

/// The SQL command a [`CommandComplete`][super::backend::CommandComplete] tag names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTag {
    Insert,
    Select,
    Update,
    Delete,
    Merge,
    Fetch,
    Move,
    Copy,
    /// `BEGIN` and `COMMIT` both report as this: neither carries a row count,
    /// and callers only need to know a transaction boundary was crossed.
    Commit,
    Rollback,
    /// Any verb this decoder does not special-case, lowercased, with internal
    /// spaces replaced by `_` (e.g. `CREATE TABLE` -> `create_table`).
    Other(String),
}

/// Split a command tag into its [`CommandTag`] and affected row count.
///
/// `INSERT` tags are `INSERT oid rows`: the row count is the third token.
/// Every other counted command (`SELECT`/`UPDATE`/`DELETE`/`MERGE`/`FETCH`/`MOVE`/`COPY`)
/// is `CMD rows`: the row count is the second token. `BEGIN`/`COMMIT`/`ROLLBACK` carry
/// no row count at all. Anything else falls back to `CommandTag::Other`: if the rest of
/// the tag starts with a digit it is treated as a bare row count, otherwise the whole
/// remainder is folded into the verb (spaces become `_`).
pub fn decode(tag: &str) -> (CommandTag, u64) {
    let mut words = tag.split_whitespace();
    let Some(cmd) = words.next() else {
        return (CommandTag::Other(String::new()), 0);
    };

    let rows = |mut words: std::str::SplitWhitespace<'_>| {
        words.next().and_then(|n| n.parse().ok()).unwrap_or(0)
    };

    match cmd {
        "INSERT" => {
            // INSERT oid rows: skip the oid, row count is the third token.
            words.next();
            (CommandTag::Insert, rows(words))
        }
        "SELECT" => (CommandTag::Select, rows(words)),
        "UPDATE" => (CommandTag::Update, rows(words)),
        "DELETE" => (CommandTag::Delete, rows(words)),
        "MERGE" => (CommandTag::Merge, rows(words)),
        "FETCH" => (CommandTag::Fetch, rows(words)),
        "MOVE" => (CommandTag::Move, rows(words)),
        "COPY" => (CommandTag::Copy, rows(words)),
        "BEGIN" | "COMMIT" => (CommandTag::Commit, 0),
        "ROLLBACK" => (CommandTag::Rollback, 0),
        _ => {
            let rest = tag[cmd.len()..].trim_start();
            match rest.chars().next() {
                Some(c) if c.is_ascii_digit() => (CommandTag::Other(cmd.to_lowercase()), rows(words)),
                Some(_) => {
                    let object = rest.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase();
                    (CommandTag::Other(format!("{}_{object}", cmd.to_lowercase())), 0)
                }
                None => (CommandTag::Other(cmd.to_lowercase()), 0),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_takes_third_token() {
        assert_eq!(decode("INSERT 0 3"), (CommandTag::Insert, 3));
    }

    #[test]
    fn select_takes_second_token() {
        assert_eq!(decode("SELECT 42"), (CommandTag::Select, 42));
    }

    #[test]
    fn begin_and_commit_both_map_to_commit() {
        assert_eq!(decode("BEGIN"), (CommandTag::Commit, 0));
        assert_eq!(decode("COMMIT"), (CommandTag::Commit, 0));
    }

    #[test]
    fn unrecognized_single_word_tag_is_other() {
        assert_eq!(decode("VACUUM"), (CommandTag::Other("vacuum".into()), 0));
    }

    #[test]
    fn unrecognized_tag_with_object_joins_with_underscore() {
        assert_eq!(
            decode("CREATE TABLE"),
            (CommandTag::Other("create_table".into()), 0)
        );
    }

    #[test]
    fn unrecognized_tag_with_digit_rest_is_treated_as_row_count() {
        assert_eq!(decode("LISTEN 5"), (CommandTag::Other("listen".into()), 5));
    }
}
