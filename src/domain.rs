//! 域（Domain）相关的纯函数
//!
//! 每个域最多有一个"对偶域"：把域名里的 Sign/Auth 后缀互换得到，
//! 由纯字符串变换决定，不查表。

use regex::Regex;

/// 获取对偶域（Sign <-> Auth）
///
/// 域名不含 Sign 也不含 Auth 时返回 None。
/// 该变换是对合的：`counterpart_domain(counterpart_domain(d)) == d`。
pub fn counterpart_domain(domain: &str) -> Option<String> {
    if domain.contains("Sign") {
        Some(domain.replace("Sign", "Auth"))
    } else if domain.contains("Auth") {
        Some(domain.replace("Auth", "Sign"))
    } else {
        None
    }
}

/// 按目标域限定用户名
///
/// 远端列表里的用户名带 `_Sign` / `_Auth` 后缀，
/// 目标清单里的裸用户名需要先按当前域补齐后缀。
pub fn qualify_username(username: &str, domain: &str) -> String {
    let suffix = if domain.contains("Sign") { "_Sign" } else { "_Auth" };
    format!("{}{}", username, suffix)
}

/// 判断一段单元格文本是否像一个域限定用户名
///
/// 启发式：包含下划线、长度合理。用于从表格行里挑出用户名列。
pub fn looks_like_identifier(text: &str) -> bool {
    if text.is_empty() || text.len() >= 100 {
        return false;
    }
    // 每次调用重新编译无妨，该函数不在热路径上
    match Regex::new(r"^\S+_\S+$") {
        Ok(re) => re.is_match(text),
        Err(_) => text.contains('_'),
    }
}
