/// Format a number with at least 9 digits, grouped by 3 with `_`, e.g.
/// `000_120_000`, so that offsets and ids line up in dumps.
pub(crate) fn format_pad9_u64(n: u64) -> String {
    let digits = format!("{:09}", n).into_bytes();

    let mut groups = digits
        .rchunks(3)
        .map(|g| String::from_utf8_lossy(g).into_owned())
        .collect::<Vec<_>>();
    groups.reverse();

    groups.join("_")
}
