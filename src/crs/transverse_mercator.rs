//! Transverse Mercator projection using the Krüger series (third order in n).
//!
//! Accurate to well under a millimetre within a UTM zone.

const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

pub(crate) struct TransverseMercator {
    /// Central meridian, radians
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
    /// Eccentricity
    e: f64,
    /// Rectifying radius
    big_a: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl TransverseMercator {
    pub(crate) fn utm(zone: u8, north: bool, inverse_flattening: f64) -> Self {
        let f = 1.0 / inverse_flattening;
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;

        Self {
            lon0: (zone as f64 * 6.0 - 183.0).to_radians(),
            k0: UTM_SCALE,
            false_easting: UTM_FALSE_EASTING,
            false_northing: if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH },
            e: 2.0 * n.sqrt() / (1.0 + n),
            big_a: SEMI_MAJOR_AXIS / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
        }
    }

    /// (lon, lat) degrees → (easting, northing) metres
    pub(crate) fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let lam = lon.to_radians() - self.lon0;

        let sin_phi = phi.sin();
        let t = (sin_phi.atanh() - self.e * (self.e * sin_phi).atanh()).sinh();
        let xi_p = t.atan2(lam.cos());
        let eta_p = (lam.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        let scale = self.k0 * self.big_a;
        (
            self.false_easting + scale * eta,
            self.false_northing + scale * xi,
        )
    }

    /// (easting, northing) metres → (lon, lat) degrees
    pub(crate) fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let scale = self.k0 * self.big_a;
        let xi = (y - self.false_northing) / scale;
        let eta = (x - self.false_easting) / scale;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, d) in self.delta.iter().enumerate() {
            phi += d * (2.0 * (j + 1) as f64 * chi).sin();
        }
        let lam = eta_p.sinh().atan2(xi_p.cos());

        ((self.lon0 + lam).to_degrees(), phi.to_degrees())
    }
}
