/// Substrings that mark a path as worth reading first (credentials, shell history,
/// infra config, notes). Each hit is worth `HINT_WEIGHT`.
pub const PRIORITY_HINTS: &[&str] = &[
    ".env",
    "credential",
    "password",
    "secret",
    "token",
    "key",
    "id_rsa",
    "id_ed25519",
    ".ssh",
    "history",
    "config",
    "kube",
    "aws",
    "docker",
    "backup",
    "readme",
    "todo",
    "notes",
];

const HINT_WEIGHT: i64 = 12;
const DOC_EXTENSION_BONUS: i64 = 3;
const SYSTEM_DIR_BONUS: i64 = 2;

pub fn score_path(path: &str) -> i64 {
    let p = path.to_lowercase();
    let mut score: i64 = 0;

    for hint in PRIORITY_HINTS {
        if p.contains(hint) {
            score += HINT_WEIGHT;
        }
    }

    if p.ends_with(".md") || p.ends_with(".txt") {
        score += DOC_EXTENSION_BONUS;
    }

    if p.contains("/etc/") || p.contains("/home/") {
        score += SYSTEM_DIR_BONUS;
    }

    score
}

/// Sort items by descending score, then ascending path. Scores are computed
/// once per item.
pub fn rank_by_path<T, F>(items: &mut [T], path_of: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by_cached_key(|item| {
        let path = path_of(item);
        (std::cmp::Reverse(score_path(path)), path.to_string())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_hint_beats_doc_extension() {
        assert_eq!(score_path("secret.key"), 24);
        assert_eq!(score_path("readme.md"), 15);
        let mut ranked = vec!["readme.md", "secret.key"];
        rank_by_path(&mut ranked, |p| *p);
        assert_eq!(ranked, vec!["secret.key", "readme.md"]);
    }

    #[test]
    fn system_dirs_and_case_insensitivity() {
        assert_eq!(score_path("srv/etc/hosts"), 2);
        assert_eq!(score_path("root/home/u/TODO.TXT"), 12 + 3 + 2);
        assert_eq!(score_path("plain/file.bin"), 0);
    }

    #[test]
    fn ties_break_by_path_and_order_is_deterministic() {
        let mut a = vec!["b.bin", "a.bin", ".env", "docs/notes.txt", "c.bin"];
        let mut b = a.clone();
        b.reverse();

        rank_by_path(&mut a, |p| *p);
        rank_by_path(&mut b, |p| *p);

        assert_eq!(a, vec!["docs/notes.txt", ".env", "a.bin", "b.bin", "c.bin"]);
        assert_eq!(a, b);
    }
}
