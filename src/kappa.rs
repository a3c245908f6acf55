//! Kaiser-Squires convergence map reconstruction
//!
//! Inverts a regular-grid shear field into a projected mass (convergence)
//! map in Fourier space, following Jeffrey et al. 2018, section 2.2
//! (arxiv.org/pdf/1801.08945.pdf). The E-mode (real part) carries the
//! lensing signal, the B-mode (imaginary part) is a null test.

use std::{io, path::Path};

use npyz::WriterBuilder;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

#[derive(thiserror::Error, Debug)]
pub enum KappaError {
    #[error("expected matching shear component lengths ({0} and {1})")]
    ComponentMismatch(usize, usize),
    #[error("expected a square grid ({0} samples for a side of {1})")]
    NotSquare(usize, usize),
    #[error("expected a finite, non-zero bin size ({0}, {1})")]
    BinSize(f64, f64),
    #[error("expected finite shear samples")]
    NonFinite,
    #[error("expected an upsampling factor of at least 1")]
    Zoom,
    #[error("Failed to write the convergence map archive")]
    Io(#[from] io::Error),
}

/// Regular square grid of shear components
///
/// Samples are row-major with the `x` index varying slowest (`ij` indexing);
/// the grid coordinates are centered on the lens.
#[derive(Debug, Clone)]
pub struct ShearGrid {
    e1: Vec<f64>,
    e2: Vec<f64>,
    size: usize,
    bin_size: (f64, f64),
}
impl ShearGrid {
    /// Builds a `size` x `size` shear grid with a physical bin size
    /// `(dx, dy)` [h-1.Mpc]
    pub fn new(
        e1: Vec<f64>,
        e2: Vec<f64>,
        size: usize,
        bin_size: (f64, f64),
    ) -> Result<Self, KappaError> {
        if e1.len() != e2.len() {
            return Err(KappaError::ComponentMismatch(e1.len(), e2.len()));
        }
        if size == 0 || e1.len() != size * size {
            return Err(KappaError::NotSquare(e1.len(), size));
        }
        let (dx, dy) = bin_size;
        if !(dx.is_finite() && dy.is_finite()) || dx == 0. || dy == 0. {
            return Err(KappaError::BinSize(dx, dy));
        }
        if e1.iter().chain(e2.iter()).any(|e| !e.is_finite()) {
            return Err(KappaError::NonFinite);
        }
        Ok(Self {
            e1,
            e2,
            size,
            bin_size,
        })
    }
    /// Returns the grid side length
    pub fn size(&self) -> usize {
        self.size
    }
    /// Returns the physical bin size [h-1.Mpc]
    pub fn bin_size(&self) -> (f64, f64) {
        self.bin_size
    }
    pub fn e1(&self) -> &[f64] {
        &self.e1
    }
    pub fn e2(&self) -> &[f64] {
        &self.e2
    }
    /// Returns the complex shear field `e1 + i e2`
    fn field(&self) -> Vec<Complex<f64>> {
        self.e1
            .iter()
            .zip(&self.e2)
            .map(|(&e1, &e2)| Complex::new(e1, e2))
            .collect()
    }
    /// Returns the lens-centered grid coordinates along one axis
    fn coordinates(n: usize, d: f64) -> Vec<f64> {
        (0..n)
            .map(|i| (i as f64 - 0.5 * (n - 1) as f64) * d)
            .collect()
    }
}

/// Discrete Fourier transform sample frequencies for `n` samples with step
/// `d`: zero first, then ascending positive, then negative frequencies
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let df = 1. / (n as f64 * d);
    (0..n)
        .map(|i| {
            if i < (n + 1) / 2 {
                i as f64 * df
            } else {
                (i as isize - n as isize) as f64 * df
            }
        })
        .collect()
}

/// Conjugate inversion kernel on the FFT frequency grid,
/// `D*(kx, ky) = (kx^2 - ky^2 - 2i kx ky) / (kx^2 + ky^2)`
///
/// The kernel only depends on the grid geometry and may be reused across
/// maps sharing `n`, `dx` and `dy`. The singular zero-frequency term is set
/// to zero, which fixes the mass-sheet degeneracy at zero mean convergence.
pub fn inversion_kernel(n: usize, dx: f64, dy: f64) -> Vec<Complex<f64>> {
    let kx = fftfreq(n, dx);
    let ky = fftfreq(n, dy);
    let mut kernel = Vec::with_capacity(n * n);
    for &kx in &kx {
        for &ky in &ky {
            let k2 = kx * kx + ky * ky;
            kernel.push(if k2 > 0. {
                Complex::new((kx * kx - ky * ky) / k2, -2. * kx * ky / k2)
            } else {
                Complex::new(0., 0.)
            });
        }
    }
    kernel
}

/// Reconstructed convergence map
pub struct KappaMap {
    kappa: Vec<Complex<f64>>,
    size: usize,
    bin_size: (f64, f64),
    /// Lens-centered grid coordinates [h-1.Mpc]
    px: Vec<f64>,
    py: Vec<f64>,
}
impl KappaMap {
    /// Reconstructs the convergence map from a shear grid
    pub fn reconstruct(grid: &ShearGrid) -> Self {
        let n = grid.size();
        let (dx, dy) = grid.bin_size();
        let mut field = grid.field();
        let mut planner = FftPlanner::new();
        fft2(&mut field, planner.plan_fft_forward(n).as_ref(), n);
        field
            .iter_mut()
            .zip(inversion_kernel(n, dx, dy))
            .for_each(|(f, k)| *f *= k);
        fft2(&mut field, planner.plan_fft_inverse(n).as_ref(), n);
        let norm = 1. / (n * n) as f64;
        field.iter_mut().for_each(|f| *f *= norm);
        Self {
            kappa: field,
            size: n,
            bin_size: (dx, dy),
            px: ShearGrid::coordinates(n, dx),
            py: ShearGrid::coordinates(n, dy),
        }
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn bin_size(&self) -> (f64, f64) {
        self.bin_size
    }
    /// Returns the complex convergence field
    pub fn kappa(&self) -> &[Complex<f64>] {
        &self.kappa
    }
    /// Returns the E-mode convergence, the physical lensing signal
    pub fn e_mode(&self) -> Vec<f64> {
        self.kappa.iter().map(|k| k.re).collect()
    }
    /// Returns the B-mode convergence, expected to vanish for pure lensing
    pub fn b_mode(&self) -> Vec<f64> {
        self.kappa.iter().map(|k| k.im).collect()
    }
    /// Returns the convergence field smoothed with a 2D Gaussian of width
    /// `sigma_hkpc` [h-1.kpc], truncated at `truncate` standard deviations
    ///
    /// `resize` is an integer nearest-neighbor upsampling factor applied
    /// before smoothing; order-0 interpolation keeps the Gaussian the only
    /// smoothing step. The E- and B-mode images are filtered independently.
    pub fn gaussian_filter(
        &self,
        sigma_hkpc: f64,
        truncate: f64,
        resize: usize,
    ) -> Result<Vec<Complex<f64>>, KappaError> {
        if resize < 1 {
            return Err(KappaError::Zoom);
        }
        let sigma_pix = sigma_hkpc * 1e-3 / self.bin_size.0;
        let n = self.size * resize;
        let k_e = zoom_nearest(&self.e_mode(), self.size, resize);
        let k_b = zoom_nearest(&self.b_mode(), self.size, resize);
        let k_e = gaussian_blur(&k_e, n, sigma_pix * resize as f64, truncate);
        let k_b = gaussian_blur(&k_b, n, sigma_pix * resize as f64, truncate);
        Ok(k_e
            .into_iter()
            .zip(k_b)
            .map(|(e, b)| Complex::new(e, b))
            .collect())
    }
    /// Saves the E/B-mode maps and the grid coordinates to an `.npz` archive
    pub fn save_npz<P: AsRef<Path>>(&self, path: P) -> Result<(), KappaError> {
        let mut npz = npyz::npz::NpzWriter::create(path)?;
        let n = self.size as u64;
        for (name, data) in [("kappa_e", self.e_mode()), ("kappa_b", self.b_mode())] {
            let mut writer = npz
                .array(name, Default::default())?
                .default_dtype()
                .shape(&[n, n])
                .begin_nd()?;
            writer.extend(data)?;
            writer.finish()?;
        }
        for (name, data) in [("px", &self.px), ("py", &self.py)] {
            let mut writer = npz
                .array(name, Default::default())?
                .default_dtype()
                .shape(&[n])
                .begin_nd()?;
            writer.extend(data.iter().copied())?;
            writer.finish()?;
        }
        npz.zip_writer().finish().map_err(io::Error::from)?;
        Ok(())
    }
}

/// In-place 2D FFT of a square row-major buffer: rows, transpose, rows,
/// transpose back
fn fft2(data: &mut [Complex<f64>], fft: &dyn Fft<f64>, n: usize) {
    for row in 0..n {
        fft.process(&mut data[row * n..(row + 1) * n]);
    }
    transpose_inplace(data, n);
    for row in 0..n {
        fft.process(&mut data[row * n..(row + 1) * n]);
    }
    transpose_inplace(data, n);
}

fn transpose_inplace(data: &mut [Complex<f64>], n: usize) {
    for i in 0..n {
        for j in i + 1..n {
            data.swap(i * n + j, j * n + i);
        }
    }
}

/// Order-0 (nearest-neighbor) integer upsampling
fn zoom_nearest(img: &[f64], n: usize, factor: usize) -> Vec<f64> {
    let m = n * factor;
    let mut out = Vec::with_capacity(m * m);
    for i in 0..m {
        for j in 0..m {
            out.push(img[(i / factor) * n + j / factor]);
        }
    }
    out
}

/// Separable 2D Gaussian convolution with a reflected boundary and a kernel
/// radius of `truncate * sigma + 0.5` pixels
fn gaussian_blur(img: &[f64], n: usize, sigma: f64, truncate: f64) -> Vec<f64> {
    if sigma <= 0. {
        return img.to_vec();
    }
    let radius = (truncate * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-(x * x) as f64 / (2. * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);

    let reflect = |mut i: isize| -> usize {
        let m = n as isize;
        loop {
            if i < 0 {
                i = -i - 1;
            } else if i >= m {
                i = 2 * m - i - 1;
            } else {
                break;
            }
        }
        i as usize
    };
    // rows
    let mut tmp = vec![0f64; n * n];
    for i in 0..n {
        for j in 0..n {
            tmp[i * n + j] = kernel
                .iter()
                .enumerate()
                .map(|(t, &k)| img[i * n + reflect(j as isize + t as isize - radius)] * k)
                .sum();
        }
    }
    // columns
    let mut out = vec![0f64; n * n];
    for i in 0..n {
        for j in 0..n {
            out[i * n + j] = kernel
                .iter()
                .enumerate()
                .map(|(t, &k)| tmp[reflect(i as isize + t as isize - radius) * n + j] * k)
                .sum();
        }
    }
    out
}
