// Pulls code out of raw completions. An empty string means "nothing usable".

use std::sync::OnceLock;

use regex::Regex;

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"))
}

/// Body of the last fenced block in `completion`, reasoning sections removed.
pub fn extract_code(completion: &str) -> String {
    let cleaned = think_block().replace_all(completion, "");
    let lines: Vec<&str> = cleaned.lines().collect();

    let fences: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.contains("```"))
        .map(|(i, _)| i)
        .collect();

    if fences.len() < 2 {
        return String::new();
    }

    let open = fences[fences.len() - 2];
    let close = fences[fences.len() - 1];
    lines[open + 1..close].join("\n").trim_end().to_string()
}

/// Generator scripts are code like any other, but must print something.
pub fn extract_generator(completion: &str) -> String {
    let code = extract_code(completion);
    if code.contains("print") || code.contains("sys.stdout") {
        code
    } else {
        String::new()
    }
}

/// Whether `instrumented` carries checks that `original` lacked.
pub fn inserted_checks(original: &str, instrumented: &str) -> bool {
    let count = |s: &str| {
        s.lines()
            .map(str::trim_start)
            .filter(|l| l.starts_with("assert ") || l.starts_with("assert(") || l.starts_with("raise "))
            .count()
    };
    count(instrumented) > count(original)
}

/// Final output convention for downstream graders.
pub fn fence(code: &str) -> String {
    format!("```\n{}\n```", code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_last_block_and_skips_reasoning() {
        let raw = "<think>\n```python\nprint('draft')\n```\n</think>\nFirst:\n```python\nprint(1)\n```\nFinal:\n```python\nprint(2)\n```\n";
        assert_eq!(extract_code(raw), "print(2)");
    }

    #[test]
    fn unfenced_completion_is_empty() {
        assert_eq!(extract_code("print(1)"), "");
        assert_eq!(extract_code("```python\nprint(1)"), "");
    }

    #[test]
    fn generator_must_print() {
        assert_eq!(extract_generator("```python\nx = 1\n```"), "");
        assert_eq!(
            extract_generator("```python\nprint(random.randint(1, 9))\n```"),
            "print(random.randint(1, 9))"
        );
    }

    #[test]
    fn detects_new_assertions() {
        let original = "def f(x):\n    return x * 2\n";
        let checked = "def f(x):\n    r = x * 2\n    assert r % 2 == 0\n    return r\n";
        assert!(inserted_checks(original, checked));
        assert!(!inserted_checks(checked, checked));
    }

    #[test]
    fn fence_wraps_code() {
        assert_eq!(fence("print(1)"), "```\nprint(1)\n```");
    }
}
