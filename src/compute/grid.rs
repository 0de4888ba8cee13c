//! Grid storage, shapes and the texture layout used to hold a grid on the GPU.

use serde::{Deserialize, Serialize};

/// Validated grid extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    D2([usize; 2]),
    D3([usize; 3]),
}

/// Errors raised while building shapes and grids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("Unsupported dimensionality {0} (expected 2 or 3)")]
    UnsupportedDimension(usize),
    #[error("Grid extents must be non-zero")]
    EmptyExtent,
    #[error("Cell buffer holds {actual} values, shape needs {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl Shape {
    pub fn new(dims: &[usize]) -> Result<Self, ShapeError> {
        if dims.contains(&0) && (2..=3).contains(&dims.len()) {
            return Err(ShapeError::EmptyExtent);
        }
        match *dims {
            [x, y] => Ok(Shape::D2([x, y])),
            [x, y, z] => Ok(Shape::D3([x, y, z])),
            _ => Err(ShapeError::UnsupportedDimension(dims.len())),
        }
    }

    pub fn dims(&self) -> &[usize] {
        match self {
            Shape::D2(dims) => dims.as_slice(),
            Shape::D3(dims) => dims.as_slice(),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dims().len()
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.dims().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extents padded to three axes with `z = 1` for 2D grids.
    pub fn extents3(&self) -> [usize; 3] {
        match *self {
            Shape::D2([x, y]) => [x, y, 1],
            Shape::D3(dims) => dims,
        }
    }

    #[inline]
    pub fn stride_y(&self) -> usize {
        self.dims()[0]
    }

    #[inline]
    pub fn stride_z(&self) -> usize {
        self.dims()[0] * self.dims()[1]
    }

    /// Flat index of a coordinate, `None` when out of range or of the wrong arity.
    pub fn index(&self, coords: &[usize]) -> Option<usize> {
        if coords.len() != self.dimension() || coords.iter().zip(self.dims()).any(|(c, d)| c >= d) {
            return None;
        }
        let strides = [1, self.stride_y(), self.stride_z()];
        Some(coords.iter().zip(strides).map(|(c, s)| c * s).sum())
    }

    /// Coordinate of a flat index, padded to three axes.
    pub fn coords(&self, index: usize) -> [usize; 3] {
        let [x, y, _] = self.extents3();
        [index % x, (index / x) % y, index / (x * y)]
    }

    /// Texture extents that hold this grid.
    ///
    /// 2D grids map one-to-one. 3D grids are flattened into a square texture
    /// whose side is the exact integer ceiling of the square root of the cell
    /// count; the trailing texels are padding.
    pub fn texture_shape(&self) -> TextureShape {
        match *self {
            Shape::D2([x, y]) => TextureShape {
                width: x as u32,
                height: y as u32,
            },
            Shape::D3(_) => {
                let side = ceil_sqrt(self.len()) as u32;
                TextureShape {
                    width: side,
                    height: side,
                }
            }
        }
    }
}

fn ceil_sqrt(n: usize) -> usize {
    let root = n.isqrt();
    if root * root == n { root } else { root + 1 }
}

/// Width and height of the backing texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureShape {
    pub width: u32,
    pub height: u32,
}

impl TextureShape {
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Texel coordinate holding a flat cell index.
    pub fn texel(&self, index: usize) -> [usize; 2] {
        let width = self.width as usize;
        [index % width, index / width]
    }
}

/// Row-major `u8` cell grid, x fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    shape: Shape,
    cells: Vec<u8>,
}

impl Grid {
    pub fn new(shape: Shape, default_value: u8) -> Self {
        Self {
            shape,
            cells: vec![default_value; shape.len()],
        }
    }

    pub fn from_cells(shape: Shape, cells: Vec<u8>) -> Result<Self, ShapeError> {
        if cells.len() != shape.len() {
            return Err(ShapeError::LengthMismatch {
                expected: shape.len(),
                actual: cells.len(),
            });
        }
        Ok(Self { shape, cells })
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.cells
    }

    pub fn get(&self, coords: &[usize]) -> Option<u8> {
        self.shape.index(coords).map(|i| self.cells[i])
    }

    /// Write a cell. Returns `false` when the coordinate is outside the grid.
    pub fn set(&mut self, coords: &[usize], value: u8) -> bool {
        match self.shape.index(coords) {
            Some(i) => {
                self.cells[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn fill(&mut self, value: u8) {
        self.cells.fill(value);
    }

    /// Number of non-zero cells.
    pub fn population(&self) -> usize {
        self.cells.iter().filter(|&&c| c > 0).count()
    }

    pub fn histogram(&self) -> [usize; 256] {
        let mut counts = [0usize; 256];
        for &cell in &self.cells {
            counts[cell as usize] += 1;
        }
        counts
    }

    /// RGBA8 texels for `texture`, each cell value replicated in all channels.
    /// Padding texels are zero.
    pub fn to_rgba(&self, texture: TextureShape) -> Vec<u8> {
        let mut texels = vec![0u8; texture.texel_count() * 4];
        for (texel, &cell) in texels.chunks_exact_mut(4).zip(&self.cells) {
            texel.fill(cell);
        }
        texels
    }

    /// Read cells back from RGBA8 rows laid out `padded_row_bytes` apart.
    ///
    /// Only channel 0 is used; texels past the last cell are ignored.
    pub fn read_rgba_rows(&mut self, data: &[u8], texture: TextureShape, padded_row_bytes: usize) {
        let width = texture.width as usize;
        let cells = data
            .chunks(padded_row_bytes)
            .flat_map(|row| row[..width * 4].chunks_exact(4).map(|texel| texel[0]));
        for (cell, value) in self.cells.iter_mut().zip(cells) {
            *cell = value;
        }
    }

    /// Rows of slice `z` as text, one character per cell (`z = 0` for 2D).
    pub fn render_slice(&self, z: usize) -> String {
        let [x, y, depth] = self.shape.extents3();
        if z >= depth {
            return String::new();
        }
        let mut out = String::with_capacity((x + 1) * y);
        for row in self.cells[z * x * y..(z + 1) * x * y].chunks(x) {
            out.extend(row.iter().map(|&c| match c {
                0 => '.',
                1..=9 => char::from(b'0' + c),
                _ => '#',
            }));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_validation() {
        assert_eq!(Shape::new(&[3, 4]).unwrap(), Shape::D2([3, 4]));
        assert_eq!(Shape::new(&[2, 2, 2]).unwrap(), Shape::D3([2, 2, 2]));
        assert_eq!(Shape::new(&[5]), Err(ShapeError::UnsupportedDimension(1)));
        assert_eq!(Shape::new(&[1, 2, 3, 4]), Err(ShapeError::UnsupportedDimension(4)));
        assert_eq!(Shape::new(&[3, 0]), Err(ShapeError::EmptyExtent));
    }

    #[test]
    fn test_row_major_index() {
        let shape = Shape::new(&[4, 3, 2]).unwrap();
        assert_eq!(shape.index(&[1, 2, 1]), Some(1 + 2 * 4 + 12));
        assert_eq!(shape.coords(1 + 2 * 4 + 12), [1, 2, 1]);
        assert_eq!(shape.index(&[4, 0, 0]), None);
        assert_eq!(shape.index(&[0, 0]), None);
    }

    #[test]
    fn test_texture_shape_3d_uses_ceil_sqrt() {
        // 2*2*2 = 8 cells -> side 3 (9 texels, one padding)
        let shape = Shape::new(&[2, 2, 2]).unwrap();
        assert_eq!(shape.texture_shape(), TextureShape { width: 3, height: 3 });

        // Perfect square stays exact
        let shape = Shape::new(&[4, 4, 4]).unwrap();
        assert_eq!(shape.texture_shape(), TextureShape { width: 8, height: 8 });

        let shape = Shape::new(&[7, 5]).unwrap();
        assert_eq!(shape.texture_shape(), TextureShape { width: 7, height: 5 });
    }

    #[test]
    fn test_ceil_sqrt_exact_near_squares() {
        for n in 1..2000usize {
            let side = ceil_sqrt(n);
            assert!(side * side >= n);
            assert!((side - 1) * (side - 1) < n);
        }
    }

    #[test]
    fn test_rgba_round_trip_ignores_padding() {
        let shape = Shape::new(&[2, 2, 2]).unwrap();
        let texture = shape.texture_shape();
        let grid = Grid::from_cells(shape, (1..=8).collect()).unwrap();

        let rgba = grid.to_rgba(texture);
        assert_eq!(rgba.len(), 9 * 4);
        assert_eq!(&rgba[4..8], &[2, 2, 2, 2]);
        assert_eq!(&rgba[32..36], &[0, 0, 0, 0]);

        // Simulate a read-back with rows padded to 256 bytes and junk in padding.
        let padded = 256;
        let mut data = vec![0xAAu8; padded * texture.height as usize];
        for (i, texel) in rgba.chunks_exact(4).enumerate() {
            let [tx, ty] = texture.texel(i);
            let offset = ty * padded + tx * 4;
            data[offset..offset + 4].copy_from_slice(texel);
        }

        let mut back = Grid::new(shape, 0);
        back.read_rgba_rows(&data, texture, padded);
        assert_eq!(back, grid);
    }

    #[test]
    fn test_get_set_and_statistics() {
        let mut grid = Grid::new(Shape::new(&[3, 3]).unwrap(), 0);
        assert!(grid.set(&[1, 1], 1));
        assert!(grid.set(&[2, 0], 4));
        assert!(!grid.set(&[3, 0], 1));
        assert_eq!(grid.get(&[1, 1]), Some(1));
        assert_eq!(grid.get(&[3, 3]), None);
        assert_eq!(grid.population(), 2);
        let histogram = grid.histogram();
        assert_eq!(histogram[0], 7);
        assert_eq!(histogram[4], 1);
        assert_eq!(grid.render_slice(0), "..4\n.1.\n...\n");
    }

    #[test]
    fn test_from_cells_checks_length() {
        let shape = Shape::new(&[2, 2]).unwrap();
        assert_eq!(
            Grid::from_cells(shape, vec![0; 3]),
            Err(ShapeError::LengthMismatch { expected: 4, actual: 3 })
        );
    }
}
