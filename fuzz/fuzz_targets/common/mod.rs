use vdom::Node;

const KINDS: [&str; 4] = ["div", "p", "li", "span"];
const KEYS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];
const ATTRS: [&str; 3] = ["class", "id", "hidden"];
const MAX_DEPTH: usize = 4;
const MAX_CHILDREN: usize = 6;

/// Byte cursor that yields zeros once the input is exhausted.
pub struct Bytes<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Bytes<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn next(&mut self) -> u8 {
        let byte = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    pub fn exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Decode a small element tree. Vocabularies are tiny so two decoded trees
/// share kinds and keys often enough to exercise matching.
pub fn tree(bytes: &mut Bytes<'_>) -> Node {
    element(bytes, 0)
}

fn element(bytes: &mut Bytes<'_>, depth: usize) -> Node {
    let b = bytes.next();
    let mut node = Node::element(KINDS[usize::from(b) % KINDS.len()]);
    if b & 0x10 != 0 {
        node = node.with_key(KEYS[usize::from(bytes.next()) % KEYS.len()]);
    }
    for _ in 0..(b >> 6) {
        let a = bytes.next();
        node = node.with_attr(ATTRS[usize::from(a) % ATTRS.len()], i64::from(a >> 2));
    }
    if depth >= MAX_DEPTH {
        return node;
    }
    let children = usize::from(bytes.next()) % (MAX_CHILDREN + 1);
    for _ in 0..children {
        let c = bytes.next();
        if c % 4 == 0 {
            node = node.with_child(Node::text(i64::from(c >> 2)));
        } else {
            node = node.with_child(element(bytes, depth + 1));
        }
    }
    node
}
