// ==========================================
// 施工时刻表导入引擎 - 自然键规范化
// ==========================================
// 职责: 自然键清洗（大小写/空白折叠、代码整理）
// 约定: 规范化后为空 → None（调用方映射为未解析哨兵）
// ==========================================

/// 折叠连续空白并去除首尾空白
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 车站代码: 大写、空白折叠，去掉方言中常见的引号/星号标记
///
/// Ril100 代码允许内部空格（如 "EF S"），因此只折叠不删除
pub fn normalize_station_code(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '*'))
        .collect();
    let code = collapse_whitespace(&cleaned).to_uppercase();
    if code.is_empty() || !code.chars().all(|c| c.is_alphanumeric() || c == ' ') {
        return None;
    }
    Some(code)
}

/// 线路号: 仅保留数字，去掉前导零
pub fn normalize_route_number(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// 区域简称: 大写、空白折叠
pub fn normalize_region(raw: &str) -> Option<String> {
    let region = collapse_whitespace(raw).to_uppercase();
    if region.is_empty() {
        None
    } else {
        Some(region)
    }
}

/// 名称类键（客户、发送方）: 空白折叠，保留大小写
pub fn normalize_name(raw: &str) -> Option<String> {
    let name = collapse_whitespace(raw);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// 案件号 / 施工措施号: 去空白、大写
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let id: String = raw.split_whitespace().collect::<String>().to_uppercase();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}
