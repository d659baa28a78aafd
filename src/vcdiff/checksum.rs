// Adler-32 of a window's target bytes.

/// Adler-32 (RFC 1950) of `data`.
pub fn adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65521;
        // Largest block before `b` can overflow a u32.
        const NMAX: usize = 5552;
        let (mut a, mut b) = (1u32, 0u32);
        for block in data.chunks(NMAX) {
            for &byte in block {
                a += u32::from(byte);
                b += a;
            }
            a %= MOD_ADLER;
            b %= MOD_ADLER;
        }
        (b << 16) | a
    }
}
