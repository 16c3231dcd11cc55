//! POINT, LINE, LSEG, BOX, PATH, POLYGON and CIRCLE.
//!
//! All coordinates travel as big-endian float8 in binary. The text forms are
//! parsed by pulling the numbers out of the bracket structure.

use std::fmt;

use crate::error::{Error, Result};

use super::Reader;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The infinite line `a·x + b·y + c = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

/// Corners are stored upper-right first, as the server normalizes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PgBox {
    pub high: Point,
    pub low: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub closed: bool,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            x: r.f64()?,
            y: r.f64()?,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.x.to_be_bytes());
        buf.extend_from_slice(&self.y.to_be_bytes());
    }
}

fn invalid(kind: &str, s: &str) -> Error {
    Error::Decode(format!("invalid {}: {:?}", kind, s))
}

/// Every number in a geometric literal, in order.
fn numbers(s: &str, kind: &str) -> Result<Vec<f64>> {
    s.split(|c: char| matches!(c, '(' | ')' | '[' | ']' | '<' | '>' | '{' | '}' | ',') || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| parse_float(t).ok_or_else(|| invalid(kind, s)))
        .collect()
}

/// Float text as the server prints it, including `Infinity` and `NaN`.
pub(crate) fn parse_float(t: &str) -> Option<f64> {
    match t {
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => t.parse().ok(),
    }
}

/// Float text the server accepts back.
pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else {
        v.to_string()
    }
}

fn points(nums: &[f64]) -> Vec<Point> {
    nums.chunks_exact(2).map(|c| Point::new(c[0], c[1])).collect()
}

fn write_points(f: &mut fmt::Formatter<'_>, points: &[Point]) -> fmt::Result {
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", p)?;
    }
    Ok(())
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", format_float(self.x), format_float(self.y))
    }
}

impl Point {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "POINT");
        let p = Point::read(&mut r)?;
        r.finish()?;
        Ok(p)
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        self.write(buf);
    }

    pub fn parse(s: &str) -> Result<Self> {
        match numbers(s, "POINT")?.as_slice() {
            [x, y] => Ok(Point::new(*x, *y)),
            _ => Err(invalid("POINT", s)),
        }
    }
}

impl Line {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "LINE");
        let line = Self {
            a: r.f64()?,
            b: r.f64()?,
            c: r.f64()?,
        };
        r.finish()?;
        Ok(line)
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        for v in [self.a, self.b, self.c] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// `{A,B,C}`, or two points on the line in segment notation.
    pub fn parse(s: &str) -> Result<Self> {
        let nums = numbers(s, "LINE")?;
        match (s.trim_start().starts_with('{'), nums.as_slice()) {
            (true, [a, b, c]) if *a != 0.0 || *b != 0.0 => Ok(Self { a: *a, b: *b, c: *c }),
            (false, [x1, y1, x2, y2]) if (x1, y1) != (x2, y2) => {
                let a = y2 - y1;
                let b = x1 - x2;
                Ok(Self {
                    a,
                    b,
                    c: -(a * x1 + b * y1),
                })
            }
            _ => Err(invalid("LINE", s)),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{},{},{}}}",
            format_float(self.a),
            format_float(self.b),
            format_float(self.c)
        )
    }
}

impl LineSegment {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "LSEG");
        let start = Point::read(&mut r)?;
        let end = Point::read(&mut r)?;
        r.finish()?;
        Ok(Self { start, end })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        self.start.write(buf);
        self.end.write(buf);
    }

    pub fn parse(s: &str) -> Result<Self> {
        match points(&numbers(s, "LSEG")?).as_slice() {
            [start, end] => Ok(Self {
                start: *start,
                end: *end,
            }),
            _ => Err(invalid("LSEG", s)),
        }
    }
}

impl fmt::Display for LineSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

impl PgBox {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "BOX");
        let high = Point::read(&mut r)?;
        let low = Point::read(&mut r)?;
        r.finish()?;
        Ok(Self { high, low })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        self.high.write(buf);
        self.low.write(buf);
    }

    pub fn parse(s: &str) -> Result<Self> {
        match points(&numbers(s, "BOX")?).as_slice() {
            [a, b] => Ok(Self {
                high: Point::new(a.x.max(b.x), a.y.max(b.y)),
                low: Point::new(a.x.min(b.x), a.y.min(b.y)),
            }),
            _ => Err(invalid("BOX", s)),
        }
    }
}

impl fmt::Display for PgBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.high, self.low)
    }
}

impl Path {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "PATH");
        let closed = r.u8()? != 0;
        let points = read_points(&mut r, "PATH")?;
        r.finish()?;
        Ok(Self { closed, points })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        buf.push(self.closed as u8);
        write_point_list(buf, &self.points);
    }

    /// `((x,y),...)` is closed, `[(x,y),...]` is open.
    pub fn parse(s: &str) -> Result<Self> {
        let nums = numbers(s, "PATH")?;
        if nums.len() % 2 != 0 || nums.is_empty() {
            return Err(invalid("PATH", s));
        }
        Ok(Self {
            closed: !s.trim_start().starts_with('['),
            points: points(&nums),
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.closed { ("(", ")") } else { ("[", "]") };
        f.write_str(open)?;
        write_points(f, &self.points)?;
        f.write_str(close)
    }
}

impl Polygon {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "POLYGON");
        let points = read_points(&mut r, "POLYGON")?;
        r.finish()?;
        Ok(Self { points })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        write_point_list(buf, &self.points);
    }

    pub fn parse(s: &str) -> Result<Self> {
        let nums = numbers(s, "POLYGON")?;
        if nums.len() % 2 != 0 || nums.is_empty() {
            return Err(invalid("POLYGON", s));
        }
        Ok(Self {
            points: points(&nums),
        })
    }
}

impl fmt::Display for Polygon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        write_points(f, &self.points)?;
        f.write_str(")")
    }
}

impl Circle {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "CIRCLE");
        let center = Point::read(&mut r)?;
        let radius = r.f64()?;
        r.finish()?;
        Ok(Self { center, radius })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) {
        self.center.write(buf);
        buf.extend_from_slice(&self.radius.to_be_bytes());
    }

    pub fn parse(s: &str) -> Result<Self> {
        match numbers(s, "CIRCLE")?.as_slice() {
            [x, y, r] => Ok(Self {
                center: Point::new(*x, *y),
                radius: *r,
            }),
            _ => Err(invalid("CIRCLE", s)),
        }
    }
}

impl fmt::Display for Circle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{},{}>", self.center, format_float(self.radius))
    }
}

fn read_points(r: &mut Reader<'_>, kind: &'static str) -> Result<Vec<Point>> {
    let count = r.i32()?;
    if count < 0 {
        return Err(Error::Decode(format!("negative point count in {}", kind)));
    }
    (0..count).map(|_| Point::read(r)).collect()
}

fn write_point_list(buf: &mut Vec<u8>, points: &[Point]) {
    buf.extend_from_slice(&(points.len() as i32).to_be_bytes());
    for p in points {
        p.write(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point() {
        let p = Point::parse("(1.5,-2)").unwrap();
        assert_eq!(p, Point::new(1.5, -2.0));
        assert_eq!(p.to_string(), "(1.5,-2)");
        let mut buf = Vec::new();
        p.write_binary(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(Point::from_binary(&buf).unwrap(), p);
    }

    #[test]
    fn test_box_normalizes_corners() {
        let b = PgBox::parse("(0,0),(2,3)").unwrap();
        assert_eq!(b.high, Point::new(2.0, 3.0));
        assert_eq!(b.to_string(), "(2,3),(0,0)");
    }

    #[test]
    fn test_path_open_closed() {
        let open = Path::parse("[(0,0),(1,1),(2,0)]").unwrap();
        assert!(!open.closed);
        assert_eq!(open.to_string(), "[(0,0),(1,1),(2,0)]");
        let closed = Path::parse("((0,0),(1,1))").unwrap();
        assert!(closed.closed);
        let mut buf = Vec::new();
        closed.write_binary(&mut buf);
        assert_eq!(Path::from_binary(&buf).unwrap(), closed);
    }

    #[test]
    fn test_circle_and_lseg() {
        let c = Circle::parse("<(1,2),3>").unwrap();
        assert_eq!(c.to_string(), "<(1,2),3>");
        let l = LineSegment::parse("[(1,2),(3,4)]").unwrap();
        assert_eq!(l.to_string(), "[(1,2),(3,4)]");
        assert!(LineSegment::parse("[(1,2)]").is_err());
    }

    #[test]
    fn test_line() {
        let line = Line::parse("{1,-1,0}").unwrap();
        assert_eq!(line, Line { a: 1.0, b: -1.0, c: 0.0 });
        assert_eq!(line.to_string(), "{1,-1,0}");
        let mut buf = Vec::new();
        line.write_binary(&mut buf);
        assert_eq!(buf.len(), 24);
        assert_eq!(Line::from_binary(&buf).unwrap(), line);

        // through (0,0) and (1,1): y - x = 0
        let through = Line::parse("[(0,0),(1,1)]").unwrap();
        assert_eq!(through, Line { a: 1.0, b: -1.0, c: 0.0 });
        assert!(Line::parse("{0,0,1}").is_err());
        assert!(Line::parse("[(1,1),(1,1)]").is_err());
    }

    #[test]
    fn test_polygon_binary() {
        let poly = Polygon::parse("((0,0),(1,0),(0,1))").unwrap();
        let mut buf = Vec::new();
        poly.write_binary(&mut buf);
        assert_eq!(&buf[..4], &3i32.to_be_bytes());
        assert_eq!(Polygon::from_binary(&buf).unwrap(), poly);
    }

    #[test]
    fn test_special_floats() {
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(parse_float("-Infinity"), Some(f64::NEG_INFINITY));
        assert!(parse_float("NaN").is_some_and(f64::is_nan));
    }
}
