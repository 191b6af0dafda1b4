//! Path canonicalization.

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar".  Node keys and walker tables are keyed by the
/// result, so two spellings of one path must meet here.
pub fn canon_path<T: AsRef<str>>(inpath: T) -> String {
    let path = inpath.as_ref();
    let absolute = path.starts_with('/');

    // Components of the result; a leading run of ".." is kept for relative
    // paths since there is nothing left to pop.
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match components.last() {
                Some(&last) if last != ".." => {
                    components.pop();
                }
                // "/.." is "/".
                _ if absolute => {}
                _ => components.push(".."),
            },
            _ => components.push(component),
        }
    }

    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&components.join("/"));
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Canonicalize, sort and deduplicate a list of paths.
pub fn canon_paths<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = paths.into_iter().map(canon_path).collect();
    out.sort();
    out.dedup();
    out
}
