//! 文件名清洗
//!
//! 客户端提交的文件名一律不可信，在与任何目录拼接之前都必须先经过
//! [`secure_filename`] 归约为安全的 basename。

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// 将任意输入归约为安全的文件名
///
/// - NFKD 分解后丢弃非 ASCII 字符（`é` 保留为 `e`）
/// - 路径分隔符 (`/`, `\`) 视为空白
/// - 连续空白合并为单个 `_`
/// - 删除 `[A-Za-z0-9_.-]` 之外的字符
/// - 去掉首尾的 `.` 和 `_`
///
/// 结果可能为空字符串，调用方需要将其视为非法文件名。
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let stripped = UNSAFE_CHARS.replace_all(&joined, "");

    stripped.trim_matches(|c| c == '.' || c == '_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(secure_filename("report.pdf"), "report.pdf");
        assert_eq!(secure_filename("a-b_c.tar.gz"), "a-b_c.tar.gz");
    }

    #[test]
    fn test_whitespace_joined() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("  spaced   out  .txt"), "spaced_out_.txt");
    }

    #[test]
    fn test_path_traversal_stripped() {
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(secure_filename("/abs/path/file.bin"), "abs_path_file.bin");
    }

    #[test]
    fn test_unsafe_chars_removed() {
        assert_eq!(secure_filename("a<b>c|d?.txt"), "abcd.txt");
    }

    #[test]
    fn test_accents_decomposed() {
        assert_eq!(secure_filename("naïve café.txt"), "naive_cafe.txt");
        assert_eq!(secure_filename("résumé café.pdf"), "resume_cafe.pdf");
        assert_eq!(secure_filename("ﬁle①.txt"), "file1.txt");
    }

    #[test]
    fn test_backslash_is_separator() {
        assert_eq!(secure_filename("a\\b.txt"), "a_b.txt");
    }

    #[test]
    fn test_reduces_to_empty() {
        assert_eq!(secure_filename(""), "");
        assert_eq!(secure_filename("../.."), "");
        assert_eq!(secure_filename("文件"), "");
        assert_eq!(secure_filename("___"), "");
    }
}
