//! 题目生成

use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::ChallengePayload;

/// 验证码字符表（去掉容易混淆的 0/O、1/I）
const CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const OPTION_COUNT: usize = 4;

/// 题目生成器
pub trait ChallengeGenerator: Send + Sync {
    fn generate(&self) -> ChallengePayload;
}

/// 默认生成器：数字、加减法、短验证码三类题目按 40/40/20 随机
#[derive(Debug, Default, Clone, Copy)]
pub struct TextChallengeGenerator;

impl TextChallengeGenerator {
    pub fn new() -> Self {
        Self
    }

    fn number<R: Rng>(rng: &mut R) -> (String, String) {
        let n = rng.gen_range(1..=20);
        (format!("请输入数字 {}", n), n.to_string())
    }

    fn arithmetic<R: Rng>(rng: &mut R) -> (String, String) {
        let mut a: i32 = rng.gen_range(1..=10);
        let mut b: i32 = rng.gen_range(1..=10);
        if rng.gen_bool(0.5) {
            (format!("{} + {} = ?", a, b), (a + b).to_string())
        } else {
            if a < b {
                std::mem::swap(&mut a, &mut b);
            }
            (format!("{} - {} = ?", a, b), (a - b).to_string())
        }
    }

    fn code<R: Rng>(rng: &mut R) -> (String, String) {
        let code: String = (0..3)
            .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
            .collect();
        (format!("请输入验证码 {}", code), code)
    }

    /// 候选答案：正确答案 + 同类干扰项，打乱顺序
    fn options<R: Rng>(rng: &mut R, answer: &str) -> Vec<String> {
        let mut options = vec![answer.to_string()];
        let numeric = answer.parse::<i32>().ok();
        let mut guard = 0;
        while options.len() < OPTION_COUNT && guard < 64 {
            guard += 1;
            let candidate = match numeric {
                Some(n) => (n + rng.gen_range(-5..=5)).max(0).to_string(),
                None => Self::code(rng).1,
            };
            if !options.contains(&candidate) {
                options.push(candidate);
            }
        }
        options.shuffle(rng);
        options
    }
}

impl ChallengeGenerator for TextChallengeGenerator {
    fn generate(&self) -> ChallengePayload {
        let mut rng = rand::thread_rng();
        let roll = rng.gen_range(0..100);
        let (prompt, answer) = if roll < 40 {
            Self::number(&mut rng)
        } else if roll < 80 {
            Self::arithmetic(&mut rng)
        } else {
            Self::code(&mut rng)
        };
        let options = Self::options(&mut rng, &answer);
        ChallengePayload {
            prompt,
            answer,
            options,
        }
    }
}

/// 固定题目（回放与测试）
#[derive(Debug, Clone)]
pub struct FixedChallengeGenerator {
    payload: ChallengePayload,
}

impl FixedChallengeGenerator {
    pub fn new(prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self {
            payload: ChallengePayload {
                prompt: prompt.into(),
                options: vec![answer.clone()],
                answer,
            },
        }
    }
}

impl ChallengeGenerator for FixedChallengeGenerator {
    fn generate(&self) -> ChallengePayload {
        self.payload.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_answers_are_among_options() {
        let generator = TextChallengeGenerator::new();
        for _ in 0..200 {
            let payload = generator.generate();
            assert!(!payload.answer.is_empty());
            assert!(payload.options.contains(&payload.answer));
            assert!(payload.options.len() <= OPTION_COUNT);
            if let Ok(n) = payload.answer.parse::<i32>() {
                assert!(n >= 0);
            }
        }
    }

    #[test]
    fn test_fixed_generator() {
        let payload = FixedChallengeGenerator::new("1 + 1 = ?", "2").generate();
        assert_eq!(payload.answer, "2");
        assert_eq!(payload.options, vec!["2".to_string()]);
    }
}
