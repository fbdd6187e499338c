use perkgate_domain::constants::CODE_SPACE;
use rand::Rng;

use super::ports::CodeGenerator;

/// Uniform draw from 000000..=999999
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let value = rand::thread_rng().gen_range(0..CODE_SPACE);
        format!("{value:06}")
    }
}

#[cfg(test)]
mod tests {
    use perkgate_domain::is_well_formed_code;

    use super::*;

    #[test]
    fn test_codes_are_six_digits() {
        let generator = RandomCodeGenerator;
        for _ in 0..1_000 {
            let code = generator.generate();
            assert!(is_well_formed_code(&code), "bad code {code}");
        }
    }
}
