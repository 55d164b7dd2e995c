pub mod kwik;

pub mod utils {
    const BASE_N_TABLE: &[u8; 64] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+/";

    /// The first `base` symbols of `0-9a-zA-Z+/`, or `None` if `base` is
    /// outside `2..=64`.
    pub fn base_n_table(base: u32) -> Option<&'static [u8]> {
        match base {
            2..=64 => Some(&BASE_N_TABLE[..base as usize]),
            _ => None,
        }
    }

    /// Parses `numeral` in the given base. `None` for an empty numeral, a
    /// symbol outside the base's table, or a value that overflows `u64`.
    pub fn decode_base_n(numeral: &str, base: u32) -> Option<u64> {
        let table = base_n_table(base)?;

        if numeral.is_empty() {
            return None;
        }

        numeral.bytes().try_fold(0u64, |value, symbol| {
            let digit = table.iter().position(|b| *b == symbol)? as u64;
            value.checked_mul(base as u64)?.checked_add(digit)
        })
    }

}
