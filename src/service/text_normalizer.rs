//! 资料文本归一化
//!
//! 刷号资料常用的混淆手法：字母间插点或空格、加重音、混用拉丁 / 希腊 /
//! 小型大写字母冒充西里尔字母、用数字代替字母。关键词规则只认西里尔
//! 写法，匹配前先把这些写法折叠回去。
//!
//! 折叠会把拉丁字母也换成西里尔字母，英文关键词要用原文匹配，
//! 所以调用方应同时保留原文。

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// 去掉混淆用的分隔符：点、空白、逗号、连字符、下划线
pub fn strip_separators(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '.' | ',' | '-' | '_') && !c.is_whitespace())
        .collect()
}

/// 兼容分解、去掉组合符号、小写，再把形近字符换成西里尔字母
pub fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(fold_char)
        .collect()
}

fn fold_char(c: char) -> char {
    match c {
        // 拉丁
        'a' => 'а',
        'b' => 'в',
        'c' => 'с',
        'e' => 'е',
        'h' => 'н',
        'k' => 'к',
        'm' => 'м',
        'o' => 'о',
        'p' => 'р',
        't' => 'т',
        'x' => 'х',
        'y' => 'у',
        // 希腊
        'α' => 'а',
        'β' => 'в',
        'ε' => 'е',
        'κ' => 'к',
        'ο' => 'о',
        'ρ' => 'р',
        'τ' => 'т',
        'υ' => 'у',
        'χ' => 'х',
        // 小型大写字母（没有兼容分解）
        'ᴀ' => 'а',
        'ʙ' => 'в',
        'ᴄ' => 'с',
        'ᴇ' => 'е',
        'ʜ' => 'н',
        'ᴋ' => 'к',
        'ᴍ' => 'м',
        'ᴏ' => 'о',
        'ᴘ' => 'р',
        'ᴛ' => 'т',
        'ʏ' => 'у',
        // leet
        '0' => 'о',
        '3' => 'з',
        '4' => 'ч',
        '6' => 'б',
        '@' => 'а',
        other => other,
    }
}

/// 参与关键词匹配的候选文本：原文、折叠后的全文、去分隔符再折叠的名字
pub fn match_candidates(text: &str, display_name: &str) -> Vec<String> {
    let mut candidates = vec![text.to_string(), fold(text)];
    if !display_name.is_empty() {
        candidates.push(fold(&strip_separators(display_name)));
    }
    candidates.dedup();
    candidates
}
