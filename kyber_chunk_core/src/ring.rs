use rand::Rng;
use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Bytes taken by one polynomial when its coefficients are packed at 12 bits.
pub const PACKED_POLY_BYTES: usize = 384;

/// Parameters describing the polynomial ring `Z_q[x]/(x^n + 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingParams {
    pub degree: usize,
    pub modulus: i64,
}

/// The ring every security level shares: `n = 256`, `q = 3329`.
pub const KYBER_RING: RingParams = RingParams::new(256, 3329);

impl RingParams {
    pub const fn new(degree: usize, modulus: i64) -> Self {
        Self { degree, modulus }
    }

    /// `round(q / 2)`, the coefficient that carries a set message bit.
    pub fn half_modulus(&self) -> i64 {
        (self.modulus + 1) / 2
    }

    pub fn reduce(&self, value: i64) -> i64 {
        let mut v = value % self.modulus;
        if v < 0 {
            v += self.modulus;
        }
        v
    }

    pub fn center(&self, value: i64) -> i64 {
        let mut v = self.reduce(value);
        let half = self.modulus / 2;
        if v > half {
            v -= self.modulus;
        }
        v
    }
}

/// Polynomial in the configured ring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingElement {
    params: RingParams,
    coeffs: Vec<i64>,
}

impl RingElement {
    pub fn zero(params: RingParams) -> Self {
        Self {
            params,
            coeffs: vec![0; params.degree],
        }
    }

    pub fn from_coeffs(params: RingParams, coeffs: Vec<i64>) -> Self {
        assert_eq!(
            coeffs.len(),
            params.degree,
            "coefficient vector must match degree"
        );
        let coeffs = coeffs.into_iter().map(|c| params.reduce(c)).collect();
        Self { params, coeffs }
    }

    pub fn params(&self) -> RingParams {
        self.params
    }

    pub fn coeffs(&self) -> &[i64] {
        &self.coeffs
    }

    pub fn add(&self, other: &Self) -> Self {
        assert_eq!(self.params, other.params);
        let coeffs = self
            .coeffs
            .iter()
            .zip(other.coeffs.iter())
            .map(|(a, b)| self.params.reduce(a + b))
            .collect();
        Self {
            params: self.params,
            coeffs,
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        assert_eq!(self.params, other.params);
        let coeffs = self
            .coeffs
            .iter()
            .zip(other.coeffs.iter())
            .map(|(a, b)| self.params.reduce(a - b))
            .collect();
        Self {
            params: self.params,
            coeffs,
        }
    }

    /// Negacyclic schoolbook product. Coefficients stay below `q`, so the
    /// `i64` accumulators cannot overflow for `n = 256` and reduction is
    /// deferred to the end.
    pub fn mul(&self, other: &Self) -> Self {
        assert_eq!(self.params, other.params);
        let n = self.params.degree;
        let mut tmp = vec![0i64; n];
        for (i, &a) in self.coeffs.iter().enumerate() {
            if a == 0 {
                continue;
            }
            for (j, &b) in other.coeffs.iter().enumerate() {
                let idx = i + j;
                if idx >= n {
                    tmp[idx - n] -= a * b;
                } else {
                    tmp[idx] += a * b;
                }
            }
        }
        Self::from_coeffs(self.params, tmp)
    }

    pub fn random_uniform<R: Rng + ?Sized>(params: RingParams, rng: &mut R) -> Self {
        let dist = Uniform::from(0..params.modulus);
        let coeffs = (0..params.degree)
            .map(|_| dist.sample(rng))
            .collect::<Vec<_>>();
        Self::from_coeffs(params, coeffs)
    }

    /// Centered binomial noise: each coefficient is the difference of two
    /// sums of `eta` fair bits, so it lies in `[-eta, eta]`.
    pub fn sample_cbd<R: Rng + ?Sized>(params: RingParams, eta: u32, rng: &mut R) -> Self {
        let mask = (1u64 << eta) - 1;
        let coeffs = (0..params.degree)
            .map(|_| {
                let bits = rng.next_u64();
                let a = (bits & mask).count_ones() as i64;
                let b = ((bits >> eta) & mask).count_ones() as i64;
                a - b
            })
            .collect::<Vec<_>>();
        Self::from_coeffs(params, coeffs)
    }

    /// Packs coefficients two at a time into three bytes, little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.coeffs.len() * 3 / 2);
        for pair in self.coeffs.chunks(2) {
            let a = pair[0] as u16;
            let b = pair.get(1).copied().unwrap_or(0) as u16;
            out.push((a & 0xFF) as u8);
            out.push(((a >> 8) | ((b & 0x0F) << 4)) as u8);
            out.push((b >> 4) as u8);
        }
        out
    }

    /// Inverse of [`RingElement::to_bytes`]. Returns `None` when the slice has
    /// the wrong length or encodes a coefficient outside `[0, q)`.
    pub fn from_bytes(params: RingParams, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != params.degree * 3 / 2 {
            return None;
        }
        let mut coeffs = Vec::with_capacity(params.degree);
        for triple in bytes.chunks_exact(3) {
            let a = i64::from(triple[0]) | (i64::from(triple[1] & 0x0F) << 8);
            let b = i64::from(triple[1] >> 4) | (i64::from(triple[2]) << 4);
            if a >= params.modulus || b >= params.modulus {
                return None;
            }
            coeffs.push(a);
            coeffs.push(b);
        }
        Some(Self { params, coeffs })
    }

    pub(crate) fn wipe(&mut self) {
        self.coeffs.zeroize();
    }
}

/// Inner product of two equal-length vectors of ring elements.
pub fn dot(lhs: &[RingElement], rhs: &[RingElement]) -> RingElement {
    assert_eq!(lhs.len(), rhs.len());
    let params = lhs.first().map_or(KYBER_RING, RingElement::params);
    lhs.iter()
        .zip(rhs)
        .fold(RingElement::zero(params), |acc, (a, b)| acc.add(&a.mul(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn monomial(power: usize, value: i64) -> RingElement {
        let mut coeffs = vec![0; KYBER_RING.degree];
        coeffs[power] = value;
        RingElement::from_coeffs(KYBER_RING, coeffs)
    }

    #[test]
    fn multiplication_wraps_negacyclically() {
        let product = monomial(255, 1).mul(&monomial(1, 1));
        assert_eq!(product.coeffs()[0], KYBER_RING.modulus - 1);
        assert!(product.coeffs()[1..].iter().all(|&c| c == 0));
    }

    #[test]
    fn one_is_multiplicative_identity() {
        let mut rng = ChaCha20Rng::from_seed([7u8; 32]);
        let a = RingElement::random_uniform(KYBER_RING, &mut rng);
        assert_eq!(a.mul(&monomial(0, 1)), a);
    }

    #[test]
    fn cbd_stays_within_eta() {
        let mut rng = ChaCha20Rng::from_seed([3u8; 32]);
        for eta in [2u32, 3] {
            let noise = RingElement::sample_cbd(KYBER_RING, eta, &mut rng);
            for &c in noise.coeffs() {
                assert!(KYBER_RING.center(c).abs() <= eta as i64);
            }
        }
    }

    #[test]
    fn packing_roundtrip_and_size() {
        let mut rng = ChaCha20Rng::from_seed([9u8; 32]);
        let a = RingElement::random_uniform(KYBER_RING, &mut rng);
        let packed = a.to_bytes();
        assert_eq!(packed.len(), PACKED_POLY_BYTES);
        assert_eq!(RingElement::from_bytes(KYBER_RING, &packed), Some(a));
    }

    #[test]
    fn unpacking_rejects_out_of_range_coefficients() {
        let mut packed = RingElement::zero(KYBER_RING).to_bytes();
        packed[0] = 0xFF;
        packed[1] = 0x0F;
        assert!(RingElement::from_bytes(KYBER_RING, &packed).is_none());
        assert!(RingElement::from_bytes(KYBER_RING, &packed[..10]).is_none());
    }
}
