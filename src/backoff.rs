use std::time::Duration;

/// Параметры экспоненциальной задержки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Задержка перед первой повторной попыткой
    pub base: Duration,
    /// Верхняя граница задержки
    pub max: Duration,
    /// Доля случайного разброса, в процентах от задержки (0..=100)
    pub jitter_percent: u8,
}

/// Экспоненциальная задержка с разбросом.
///
/// Каждый вызов [`ExponentialBackoff::next_delay`] удваивает базовую
/// задержку до `max`; разброс вычитается, чтобы не превышать границу.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter_percent: 20,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Номер следующей попытки, начиная с нуля.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Задержка без разброса для попытки `attempt`.
    pub fn delay_for(
        &self,
        attempt: u32,
    ) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.config
            .base
            .checked_mul(factor)
            .unwrap_or(self.config.max)
            .min(self.config.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = u64::from(self.config.jitter_percent.min(100));
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if jitter == 0 || millis == 0 {
            return delay;
        }
        let spread = millis.saturating_mul(jitter) / 100;
        Duration::from_millis(millis - fastrand::u64(0..=spread))
    }

    /// Сбрасывает счётчик после успешной попытки.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
