/// Width of the sliding window the rolling checksum covers.
pub const ROLLING_WINDOW: usize = 7;

/// Rolling checksum over the last `ROLLING_WINDOW` bytes.
///
/// Combines a plain sum, a position-weighted sum and a shift/xor hash so the
/// value depends only on the window contents, never on earlier bytes.
#[derive(Debug, Clone, Default)]
pub struct RollingHash {
    window: [u8; ROLLING_WINDOW],
    h1: u32,
    h2: u32,
    h3: u32,
    n: usize,
}

impl RollingHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, c: u8) {
        let c32 = c as u32;
        let slot = self.n % ROLLING_WINDOW;

        self.h2 = self.h2.wrapping_sub(self.h1);
        self.h2 = self
            .h2
            .wrapping_add((ROLLING_WINDOW as u32).wrapping_mul(c32));

        self.h1 = self.h1.wrapping_add(c32);
        self.h1 = self.h1.wrapping_sub(self.window[slot] as u32);

        self.window[slot] = c;
        self.n = self.n.wrapping_add(1);

        // Bytes older than the window shift out of the 32-bit register.
        self.h3 = self.h3.wrapping_shl(5);
        self.h3 ^= c32;
    }

    pub fn sum(&self) -> u32 {
        self.h1.wrapping_add(self.h2).wrapping_add(self.h3)
    }
}
