use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(String),
    Number(&'a str),
}

/// Splits a name into alternating text and digit runs, always starting with
/// a (possibly empty) text run so segments line up position by position.
fn segments(name: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = false;
    for (i, c) in name.char_indices() {
        let digit = c.is_ascii_digit();
        if digit != in_digits {
            out.push(segment(&name[start..i], in_digits));
            start = i;
            in_digits = digit;
        }
    }
    out.push(segment(&name[start..], in_digits));
    out
}

fn segment(run: &str, digits: bool) -> Segment<'_> {
    if digits {
        Segment::Number(run)
    } else {
        Segment::Text(run.to_lowercase())
    }
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_segments(a: &Segment<'_>, b: &Segment<'_>) -> Ordering {
    match (a, b) {
        (Segment::Text(x), Segment::Text(y)) => x.cmp(y),
        (Segment::Number(x), Segment::Number(y)) => compare_numbers(x, y),
        // Unreachable with aligned segments; keep the order total anyway.
        (Segment::Number(_), Segment::Text(_)) => Ordering::Less,
        (Segment::Text(_), Segment::Number(_)) => Ordering::Greater,
    }
}

pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = segments(a);
    let right = segments(b);
    for (x, y) in left.iter().zip(right.iter()) {
        let ord = compare_segments(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len()
        .cmp(&right.len())
        .then_with(|| a.cmp(b))
}

pub fn sort_natural<T: AsRef<str>>(names: &mut [T]) {
    names.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(input: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = input.iter().map(|s| s.to_string()).collect();
        sort_natural(&mut names);
        names
    }

    #[test]
    fn digit_runs_compare_by_value() {
        assert_eq!(sorted(&["f2", "f10", "f1"]), vec!["f1", "f2", "f10"]);
    }

    #[test]
    fn text_is_case_insensitive() {
        assert_eq!(sorted(&["B", "a"]), vec!["a", "B"]);
        assert_eq!(sorted(&["Zeta", "alpha", "Beta"]), vec!["alpha", "Beta", "Zeta"]);
    }

    #[test]
    fn leading_zeros_do_not_change_value() {
        assert_eq!(
            sorted(&["ep010.mkv", "ep9.mkv", "ep0011.mkv"]),
            vec!["ep9.mkv", "ep010.mkv", "ep0011.mkv"]
        );
        assert_ne!(natural_cmp("a007", "a7"), Ordering::Equal);
    }

    #[test]
    fn multiple_digit_runs() {
        assert_eq!(
            sorted(&["s2e10", "s10e1", "s2e2"]),
            vec!["s2e2", "s2e10", "s10e1"]
        );
    }

    #[test]
    fn numbers_beyond_u64_still_order() {
        let big = "x123456789012345678901234567890";
        let bigger = "x923456789012345678901234567890";
        assert_eq!(natural_cmp(big, bigger), Ordering::Less);
        assert_eq!(natural_cmp("x99", big), Ordering::Less);
    }

    #[test]
    fn prefix_sorts_first() {
        assert_eq!(sorted(&["file1", "file"]), vec!["file", "file1"]);
    }

    #[test]
    fn segments_alternate_from_text() {
        assert_eq!(
            segments("12ab3"),
            vec![
                Segment::Text(String::new()),
                Segment::Number("12"),
                Segment::Text("ab".into()),
                Segment::Number("3"),
            ]
        );
    }
}
