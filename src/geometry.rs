//! Graphics-state bookkeeping for operator scanning.
//!
//! Mirrors the subset of the content-stream state machine needed to locate
//! painted elements: the current transformation matrix under `q`/`Q`/`cm`,
//! and the bounding box of the most recently constructed path.

/// 2D transformation matrix [a, b, c, d, e, f]
/// Represents: | a b 0 |
///             | c d 0 |
///             | e f 1 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::identity()
    }
}

impl Matrix {
    pub fn identity() -> Self {
        Matrix {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Matrix { a, b, c, d, e, f }
    }

    /// Build a matrix from a 6-element slice, `None` for any other length
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [a, b, c, d, e, f] => Some(Matrix::new(*a, *b, *c, *d, *e, *f)),
            _ => None,
        }
    }

    /// Concatenate another matrix: self * other
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Map a point from the matrix's input space into its output space
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.a + y * self.c + self.e,
            x * self.b + y * self.d + self.f,
        )
    }
}

/// Stack of transforms mirroring `save`/`restore`/`transform`.
///
/// The bottom frame is never popped, so the stack always has a current matrix.
#[derive(Debug, Clone)]
pub struct TransformTracker {
    stack: Vec<Matrix>,
}

impl Default for TransformTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformTracker {
    pub fn new() -> Self {
        TransformTracker {
            stack: vec![Matrix::identity()],
        }
    }

    pub fn push(&mut self) {
        let top = self.current();
        self.stack.push(top);
    }

    /// Discard the top frame. Unbalanced restores at the bottom are ignored.
    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Compose an incoming `cm` matrix with the current state.
    ///
    /// The incoming matrix is applied first: new = incoming * current.
    pub fn apply(&mut self, incoming: &Matrix) {
        if let Some(top) = self.stack.last_mut() {
            *top = incoming.concat(top);
        }
    }

    pub fn current(&self) -> Matrix {
        self.stack.last().copied().unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Axis-aligned bounds of a constructed path, in the space active at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ClipBounds {
    /// Min/max reduction over a flat `[x0, y0, x1, y1, ...]` point list.
    ///
    /// A trailing unpaired coordinate is ignored; an empty list has no bounds.
    pub fn from_points(coords: &[f64]) -> Option<Self> {
        let mut pairs = coords.chunks_exact(2);
        let first = pairs.next()?;
        let mut bounds = ClipBounds {
            min_x: first[0],
            min_y: first[1],
            max_x: first[0],
            max_y: first[1],
        };
        for pair in pairs {
            bounds.min_x = bounds.min_x.min(pair[0]);
            bounds.min_y = bounds.min_y.min(pair[1]);
            bounds.max_x = bounds.max_x.max(pair[0]);
            bounds.max_y = bounds.max_y.max(pair[1]);
        }
        Some(bounds)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Bounds of this box's four corners after mapping through `matrix`
    pub fn transformed(&self, matrix: &Matrix) -> ClipBounds {
        let corners = [
            matrix.transform_point(self.min_x, self.min_y),
            matrix.transform_point(self.max_x, self.min_y),
            matrix.transform_point(self.min_x, self.max_y),
            matrix.transform_point(self.max_x, self.max_y),
        ];
        let flat: Vec<f64> = corners.iter().flat_map(|(x, y)| [*x, *y]).collect();
        // four corners always yield bounds
        ClipBounds::from_points(&flat).unwrap_or(*self)
    }
}

/// Tracks the "current" path bounds with a side-stack parallel to the transform stack.
#[derive(Debug, Clone, Default)]
pub struct ClipTracker {
    current: Option<ClipBounds>,
    saved: Vec<Option<ClipBounds>>,
}

impl ClipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the bounds of a newly constructed path.
    ///
    /// A path with no coordinate pairs leaves the current bounds untouched.
    pub fn construct_path(&mut self, coords: &[f64]) {
        if let Some(bounds) = ClipBounds::from_points(coords) {
            self.current = Some(bounds);
        }
    }

    pub fn push(&mut self) {
        self.saved.push(self.current);
    }

    pub fn pop(&mut self) {
        if let Some(previous) = self.saved.pop() {
            self.current = previous;
        }
    }

    pub fn current(&self) -> Option<ClipBounds> {
        self.current
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}
