//! Scripts that move file contents to and from the device.

/// Quote `text` as a single-quoted string literal for the device's parser.
///
/// Control characters are escaped so that raw-mode bytes such as 0x04 inside
/// file contents cannot end the submission early.
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                quoted.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Plan for writing `content` into `name` on the device, one write per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePush {
    name: String,
    lines: Vec<String>,
    skipped_trailing: bool,
}

impl FilePush {
    pub fn new(name: &str, content: &str) -> Self {
        let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();

        // A final piece holding only line terminators is never written.
        let mut skipped_trailing = content.ends_with('\n');
        if let Some(last) = lines.last() {
            if last.trim_end_matches(['\r', '\n']).is_empty() && !last.ends_with('\n') {
                lines.pop();
                skipped_trailing = true;
            }
        }

        Self {
            name: name.to_string(),
            lines,
            skipped_trailing,
        }
    }

    /// Lines that will be written, terminators included.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether an empty final line was dropped.
    pub fn skipped_trailing(&self) -> bool {
        self.skipped_trailing
    }

    pub fn open_instruction(&self) -> String {
        format!("f = open({}, 'w')\n", quote(&self.name))
    }

    pub fn write_instructions(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| format!("f.write({})\n", quote(line)))
            .collect()
    }

    pub fn close_instruction(&self) -> &'static str {
        "f.close()\n"
    }

    /// The whole program submitted in one raw-mode transaction.
    pub fn script(&self) -> String {
        let mut script = self.open_instruction();
        for instruction in self.write_instructions() {
            script.push_str(&instruction);
        }
        script.push_str(self.close_instruction());
        script
    }
}

/// Program that prints the contents of `name` without a trailing newline.
pub fn read_script(name: &str) -> String {
    format!(
        "with open({}) as f:\n    print(f.read(), end='')\n",
        quote(name)
    )
}

/// Program that prints one directory entry per line.
pub fn list_script(path: &str) -> String {
    format!(
        "import os\nfor n in os.listdir({}):\n    print(n)\n",
        quote(path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_skips_empty_trailing_line() {
        let push = FilePush::new("temp.py", "a\nb\n");

        assert_eq!(push.lines(), ["a\n", "b\n"]);
        assert!(push.skipped_trailing());
        assert_eq!(
            push.write_instructions(),
            vec!["f.write('a\\n')\n".to_string(), "f.write('b\\n')\n".to_string()]
        );
        assert_eq!(
            push.script(),
            "f = open('temp.py', 'w')\nf.write('a\\n')\nf.write('b\\n')\nf.close()\n"
        );
    }

    #[test]
    fn test_push_without_final_newline() {
        let push = FilePush::new("main.py", "print(1)\nprint(2)");
        assert_eq!(push.lines(), ["print(1)\n", "print(2)"]);
        assert!(!push.skipped_trailing());
    }

    #[test]
    fn test_push_drops_lone_carriage_return() {
        let push = FilePush::new("x.txt", "a\n\r");
        assert_eq!(push.lines(), ["a\n"]);
        assert!(push.skipped_trailing());
    }

    #[test]
    fn test_push_empty_content() {
        let push = FilePush::new("empty.txt", "");
        assert!(push.lines().is_empty());
        assert_eq!(push.script(), "f = open('empty.txt', 'w')\nf.close()\n");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("it's"), "'it\\'s'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
        assert_eq!(quote("\t\r\n"), "'\\t\\r\\n'");
        assert_eq!(quote("\u{4}"), "'\\x04'");
        assert_eq!(quote("µ"), "'µ'");
    }

    #[test]
    fn test_read_and_list_scripts() {
        assert_eq!(
            read_script("boot.py"),
            "with open('boot.py') as f:\n    print(f.read(), end='')\n"
        );
        assert!(list_script("/lib").contains("os.listdir('/lib')"));
    }
}
