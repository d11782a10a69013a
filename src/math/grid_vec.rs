//! Integer lattice coordinate

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use glam::{DVec3, I64Vec3};

/// Signed 64-bit 3D grid coordinate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridVec {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl GridVec {
    pub const ZERO: GridVec = GridVec { x: 0, y: 0, z: 0 };

    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: i64) -> Self {
        Self { x: v, y: v, z: v }
    }

    /// Cell containing a continuous position (floor on every axis)
    pub fn from_floor(p: DVec3) -> Self {
        Self {
            x: p.x.floor() as i64,
            y: p.y.floor() as i64,
            z: p.z.floor() as i64,
        }
    }

    pub fn dot(&self, other: &GridVec) -> i64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length_squared(&self) -> i64 {
        self.dot(self)
    }

    pub fn length(&self) -> f64 {
        (self.length_squared() as f64).sqrt()
    }

    /// Length measured to the cell centre rather than its corner
    pub fn length_centred(&self) -> f64 {
        self.centre().length()
    }

    /// Manhattan length
    pub fn abs_sum(&self) -> i64 {
        self.x.abs() + self.y.abs() + self.z.abs()
    }

    /// Largest absolute component
    pub fn max_abs(&self) -> i64 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }

    /// Centre of this cell in continuous coordinates
    pub fn centre(&self) -> DVec3 {
        DVec3::new(self.x as f64 + 0.5, self.y as f64 + 0.5, self.z as f64 + 0.5)
    }

    pub fn distance_squared(&self, other: &GridVec) -> i64 {
        (*self - *other).length_squared()
    }

    /// Offset by `amount` cells along axis `axis` (0..3)
    pub fn step(&self, axis: usize, amount: i64) -> Self {
        let mut out = *self;
        match axis {
            0 => out.x += amount,
            1 => out.y += amount,
            _ => out.z += amount,
        }
        out
    }
}

impl From<I64Vec3> for GridVec {
    fn from(v: I64Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<GridVec> for I64Vec3 {
    fn from(g: GridVec) -> Self {
        I64Vec3::new(g.x, g.y, g.z)
    }
}

impl From<[i64; 3]> for GridVec {
    fn from(v: [i64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl Add for GridVec {
    type Output = GridVec;
    fn add(self, rhs: GridVec) -> GridVec {
        GridVec::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for GridVec {
    fn add_assign(&mut self, rhs: GridVec) {
        *self = *self + rhs;
    }
}

impl Sub for GridVec {
    type Output = GridVec;
    fn sub(self, rhs: GridVec) -> GridVec {
        GridVec::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for GridVec {
    fn sub_assign(&mut self, rhs: GridVec) {
        *self = *self - rhs;
    }
}

impl Neg for GridVec {
    type Output = GridVec;
    fn neg(self) -> GridVec {
        GridVec::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<GridVec> for i64 {
    type Output = GridVec;
    fn mul(self, rhs: GridVec) -> GridVec {
        GridVec::new(self * rhs.x, self * rhs.y, self * rhs.z)
    }
}

/// Scaling by a real factor floors the result back onto the lattice
impl Mul<GridVec> for f64 {
    type Output = GridVec;
    fn mul(self, rhs: GridVec) -> GridVec {
        GridVec::from_floor(DVec3::new(rhs.x as f64, rhs.y as f64, rhs.z as f64) * self)
    }
}

impl fmt::Display for GridVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}
