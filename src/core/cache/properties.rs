//! 索引文件使用的 `key=value` 文本格式
//!
//! 与 `java.util.Properties` 的 `store`/`load` 兼容：注释行以 `#` 或 `!` 开头，
//! 键和值之间以第一个未转义的 `=`、`:` 或空白分隔，行尾的 `\` 表示续行，
//! 非 ASCII 字符写为 `\uXXXX`。

use crate::core::error::{DownloadError, DownloadResult};

/// 解析出的一条记录，或者一行无法解析的错误
pub type Entry = DownloadResult<(String, String)>;

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

/// 行尾是否有奇数个反斜杠
fn has_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn corruption(source: &str, line: usize, reason: impl Into<String>) -> DownloadError {
    DownloadError::IndexCorruption {
        file: source.to_string(),
        line,
        reason: reason.into(),
    }
}

/// 解析全部内容，返回 (起始行号, 记录)。坏行以 `Err` 形式保留，由调用方决定如何处理
pub fn parse(source: &str, content: &str) -> Vec<(usize, Entry)> {
    let mut entries = Vec::new();
    let mut lines = content.lines().enumerate();

    while let Some((index, raw)) = lines.next() {
        let line_no = index + 1;
        let first = raw.trim_start_matches(is_blank);
        if first.is_empty() || first.starts_with('#') || first.starts_with('!') {
            continue;
        }

        let mut logical = String::from(first);
        while has_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start_matches(is_blank)),
                None => break,
            }
        }

        entries.push((line_no, parse_logical_line(source, line_no, &logical)));
    }

    entries
}

fn parse_logical_line(source: &str, line_no: usize, line: &str) -> Entry {
    let chars: Vec<char> = line.chars().collect();
    let mut key_end = None;
    let mut value_start = chars.len();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            i += 2;
            continue;
        }
        if c == '=' || c == ':' {
            key_end = Some(i);
            value_start = i + 1;
            break;
        }
        if is_blank(c) {
            key_end = Some(i);
            let mut j = i;
            while j < chars.len() && is_blank(chars[j]) {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '=' || chars[j] == ':') {
                j += 1;
            }
            value_start = j;
            break;
        }
        i += 1;
    }

    let key_end = key_end.ok_or_else(|| corruption(source, line_no, "缺少分隔符"))?;
    while value_start < chars.len() && is_blank(chars[value_start]) {
        value_start += 1;
    }

    let key: String = chars[..key_end].iter().collect();
    let value: String = chars[value_start..].iter().collect();
    let key = unescape(&key).map_err(|reason| corruption(source, line_no, reason))?;
    let value = unescape(&value).map_err(|reason| corruption(source, line_no, reason))?;
    if key.is_empty() {
        return Err(corruption(source, line_no, "键为空"));
    }
    Ok((key, value))
}

fn unescape(input: &str) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    let mut high_surrogate: Option<u16> = None;

    while let Some(c) = chars.next() {
        if c != '\\' {
            if high_surrogate.is_some() {
                return Err("孤立的代理字符".to_string());
            }
            out.push(c);
            continue;
        }

        let escaped = match chars.next() {
            Some(e) => e,
            None => break,
        };
        if escaped == 'u' {
            let hex: String = chars.by_ref().take(4).collect();
            let unit = u16::from_str_radix(&hex, 16)
                .ok()
                .filter(|_| hex.len() == 4)
                .ok_or_else(|| format!("无效的 \\u 转义: \\u{}", hex))?;
            match (high_surrogate.take(), unit) {
                (None, 0xD800..=0xDBFF) => high_surrogate = Some(unit),
                (Some(high), 0xDC00..=0xDFFF) => {
                    let decoded = char::decode_utf16([high, unit])
                        .next()
                        .and_then(|r| r.ok())
                        .ok_or_else(|| "无效的代理对".to_string())?;
                    out.push(decoded);
                }
                (None, _) => match char::from_u32(unit as u32) {
                    Some(decoded) => out.push(decoded),
                    None => return Err("孤立的代理字符".to_string()),
                },
                (Some(_), _) => return Err("孤立的代理字符".to_string()),
            }
            continue;
        }

        if high_surrogate.is_some() {
            return Err("孤立的代理字符".to_string());
        }
        out.push(match escaped {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'f' => '\x0c',
            other => other,
        });
    }

    if high_surrogate.is_some() {
        return Err("孤立的代理字符".to_string());
    }
    Ok(out)
}

/// 转义键或值。键中的所有空格都需要转义，值只转义开头的空格
pub fn escape(input: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for (i, c) in input.chars().enumerate() {
        match c {
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04X}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// 生成文件内容：注释头、时间戳，然后是按键排序的记录
pub fn render<I, K, V>(entries: I, header: &str) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut sorted: Vec<(String, String)> = entries
        .into_iter()
        .map(|(k, v)| (escape(k.as_ref(), true), escape(v.as_ref(), false)))
        .collect();
    sorted.sort();

    let mut out = String::new();
    out.push('#');
    out.push_str(header);
    out.push('\n');
    out.push('#');
    out.push_str(&chrono::Local::now().format("%a %b %d %H:%M:%S %Z %Y").to_string());
    out.push('\n');
    for (key, value) in sorted {
        out.push_str(&key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_entries(content: &str) -> Vec<(String, String)> {
        parse("test.txt", content)
            .into_iter()
            .map(|(_, e)| e.unwrap())
            .collect()
    }

    #[test]
    fn test_parse_java_written_file() {
        let content = "#Changed at\n\
                       #Sat Oct 19 12:00:00 CEST 2026\n\
                       https\\://example.com/a.bin=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU\\=\n";
        let entries = ok_entries(content);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "https://example.com/a.bin");
        assert_eq!(entries[0].1, "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn test_parse_separators_and_comments() {
        let content = "! bang comment\n\
                       \n\
                       a=1\n\
                       b : 2\n\
                       c 3\n\
                       d=x=y\n";
        let entries = ok_entries(content);
        assert_eq!(
            entries,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
                ("d".to_string(), "x=y".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_continuation_and_unicode() {
        let content = "name=hello \\\n    world\nzh=\\u4E2D\\u6587\nemoji=\\uD83D\\uDE00\n";
        let entries = ok_entries(content);
        assert_eq!(entries[0].1, "hello world");
        assert_eq!(entries[1].1, "中文");
        assert_eq!(entries[2].1, "😀");
    }

    #[test]
    fn test_malformed_lines_reported_with_line_number() {
        let content = "good=1\nnoseparator\nbad=\\u12G4\n=empty\n";
        let entries = parse("idx.txt", content);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].0, 3);
        let entries: Vec<Entry> = entries.into_iter().map(|(_, e)| e).collect();
        assert!(entries[0].is_ok());
        match &entries[1] {
            Err(DownloadError::IndexCorruption { file, line, .. }) => {
                assert_eq!(file, "idx.txt");
                assert_eq!(*line, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(entries[2], Err(DownloadError::IndexCorruption { line: 3, .. })));
        assert!(matches!(entries[3], Err(DownloadError::IndexCorruption { line: 4, .. })));
    }

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(escape("http://a/b#c", true), "http\\://a/b\\#c");
        assert_eq!(escape("a b", true), "a\\ b");
        assert_eq!(escape(" a b", false), "\\ a b");
        assert_eq!(escape("x=y!", false), "x\\=y\\!");
        assert_eq!(escape("中", false), "\\u4E2D");
        assert_eq!(escape("\t\n", false), "\\t\\n");
    }

    #[test]
    fn test_render_sorted_and_parsable() {
        let entries = vec![
            ("http://z/1", "hash z"),
            ("http://a/2", " lead"),
            ("http://m/文件", "名字.bin"),
        ];
        let content = render(entries.clone(), "Changed at");
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("#Changed at"));
        assert!(lines.next().unwrap().starts_with('#'));
        assert!(lines.next().unwrap().starts_with("http\\://a/2="));

        let parsed = ok_entries(&content);
        let mut expected: Vec<(String, String)> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        expected.sort();
        assert_eq!(parsed, expected);
    }
}
